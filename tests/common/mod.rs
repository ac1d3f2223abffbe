// tests/common/mod.rs

//! Shared fixtures for integration tests: an application tree, a staged
//! release next to it, and a work directory for backups, state and lock.

#![allow(dead_code)]

use ship::manifest::NotificationTarget;
use ship::notify::{NotificationDispatcher, RunEvent};
use ship::{MANIFEST_FILE, PipelineSettings, StagedRelease, UpdatePipeline};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Keep the fixture alive for the whole test; dropping it removes everything
pub struct Fixture {
    pub temp: TempDir,
    pub app: PathBuf,
    pub staging: PathBuf,
    pub work: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let app = temp.path().join("srv").join("app");
        let staging = temp.path().join("staging");
        let work = temp.path().join("var");
        fs::create_dir_all(&app).unwrap();
        fs::create_dir_all(&staging).unwrap();
        fs::create_dir_all(&work).unwrap();
        Self {
            temp,
            app,
            staging,
            work,
        }
    }

    /// Path inside the temp root but outside app, staging and work
    pub fn scratch(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }

    pub fn write_app(&self, rel: &str, content: &str) {
        write(&self.app, rel, content);
    }

    pub fn write_release(&self, rel: &str, content: &str) {
        write(&self.staging, rel, content);
    }

    pub fn link_app(&self, rel: &str, target: &str) {
        let path = self.app.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        symlink(target, path).unwrap();
    }

    pub fn read_app(&self, rel: &str) -> String {
        fs::read_to_string(self.app.join(rel)).unwrap()
    }

    /// Write the release manifest
    pub fn manifest(&self, yaml: &str) {
        fs::write(self.staging.join(MANIFEST_FILE), yaml).unwrap();
    }

    pub fn release(&self) -> StagedRelease {
        StagedRelease::open("main", &self.staging, true, MANIFEST_FILE).unwrap()
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings::with_work_dir(&self.app, &self.work)
    }

    pub fn pipeline(&self) -> UpdatePipeline {
        UpdatePipeline::new(self.settings())
    }

    pub fn forced_pipeline(&self) -> UpdatePipeline {
        let mut settings = self.settings();
        settings.force = true;
        UpdatePipeline::new(settings)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.work.join("backups")
    }

    /// Completed backups on disk, by directory name
    pub fn backups(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.backup_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !name.ends_with(".partial"))
            .collect();
        names.sort();
        names
    }

    pub fn state(&self) -> Option<serde_json::Value> {
        let text = fs::read_to_string(self.work.join("state.json")).ok()?;
        Some(serde_json::from_str(&text).unwrap())
    }

    /// TOML config pointing at this fixture
    pub fn config_toml(&self) -> String {
        format!(
            r#"[general]
app_dir = "{app}"
backup_dir = "{work}/backups"
state_file = "{work}/state.json"
lock_file = "{work}/ship.lock"

[sources.main]
staging_dir = "{staging}"
verified = true
"#,
            app = self.app.display(),
            work = self.work.display(),
            staging = self.staging.display(),
        )
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Byte-exact picture of a tree: files by content, symlinks by target,
/// directories by an empty marker
pub fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut tree = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.unwrap();
        let rel = entry.path().strip_prefix(root).unwrap().to_string_lossy().into_owned();
        let file_type = entry.file_type();
        let value = if file_type.is_symlink() {
            let target = fs::read_link(entry.path()).unwrap();
            format!("link:{}", target.display()).into_bytes()
        } else if file_type.is_dir() {
            b"dir".to_vec()
        } else {
            fs::read(entry.path()).unwrap()
        };
        tree.insert(rel, value);
    }
    tree
}

/// Dispatcher that records every notification it is handed
#[derive(Clone, Default)]
pub struct RecordingDispatcher {
    pub sent: Arc<Mutex<Vec<(RunEvent, String)>>>,
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, event: &RunEvent, _target: &NotificationTarget, message: &str) -> Result<(), String> {
        self.sent.lock().unwrap().push((event.clone(), message.to_string()));
        Ok(())
    }
}

impl RecordingDispatcher {
    pub fn events(&self) -> Vec<(RunEvent, String)> {
        self.sent.lock().unwrap().clone()
    }
}
