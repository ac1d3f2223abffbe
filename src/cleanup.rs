// src/cleanup.rs

//! Post-commit cleanup
//!
//! Runs after a run is committed. Nothing here can change the recorded
//! outcome: every failure becomes a warning in the [`CleanupReport`].
//!
//! `remove_files` and `remove_directories` patterns match app-relative
//! paths; a pattern without `/` also matches the last path component, so
//! `__pycache__` removes every `__pycache__` directory. Contents of
//! preserved directories are never removed by these patterns; directory
//! `cleanup_old` retention is the only thing that prunes them.

use crate::filesystem::{self, path::match_key};
use crate::hooks::ExternalCommand;
use crate::manifest::{DirectoryRule, Manifest, RulePattern};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_files: Vec<String>,
    pub removed_dirs: Vec<String>,
    /// Files dropped by `cleanup_old` retention
    pub expired_files: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct CleanupRunner {
    app_dir: PathBuf,
}

impl CleanupRunner {
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        Self { app_dir: app_dir.into() }
    }

    pub fn run(&self, manifest: &Manifest) -> CleanupReport {
        self.run_at(manifest, SystemTime::now())
    }

    pub fn run_at(&self, manifest: &Manifest, now: SystemTime) -> CleanupReport {
        let mut report = CleanupReport::default();
        let tasks = &manifest.cleanup;

        if !tasks.remove_files.is_empty() || !tasks.remove_directories.is_empty() {
            self.remove_matching(manifest, &mut report);
        }

        for dir in manifest.directories.iter().filter(|d| d.cleanup_old) {
            self.expire_old_files(dir, now, &mut report);
        }

        for command in &tasks.commands {
            let probe = ExternalCommand::shell(command, COMMAND_TIMEOUT);
            let probe = if self.app_dir.is_dir() {
                probe.current_dir(&self.app_dir)
            } else {
                probe
            };
            match probe.run() {
                Ok(outcome) if outcome.success() => info!("Cleanup command completed: {}", command),
                Ok(outcome) => {
                    outcome.relay("cleanup");
                    report.warnings.push(format!("cleanup command failed: {}", command));
                }
                Err(e) => report.warnings.push(format!("cleanup command {} could not run: {}", command, e)),
            }
        }

        for warning in &report.warnings {
            warn!("{}", warning);
        }
        report
    }

    fn remove_matching(&self, manifest: &Manifest, report: &mut CleanupReport) {
        let preserved: Vec<&DirectoryRule> = manifest.directories.iter().filter(|d| d.preserve).collect();
        let tasks = &manifest.cleanup;

        let mut walker = WalkDir::new(&self.app_dir).min_depth(1).sort_by_file_name().into_iter();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    report.warnings.push(format!("cleanup walk error: {}", e));
                    continue;
                }
            };
            let Ok(rel) = entry.path().strip_prefix(&self.app_dir) else {
                continue;
            };
            let key = match_key(rel);
            let is_dir = entry.file_type().is_dir();

            if preserved.iter().any(|d| d.pattern.matches(&key) || d.contains(&key)) {
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }

            if is_dir {
                if matches_any(&tasks.remove_directories, &key) {
                    match filesystem::remove_any(entry.path()) {
                        Ok(()) => {
                            debug!("Removed directory {}", key);
                            report.removed_dirs.push(key);
                        }
                        Err(e) => report.warnings.push(format!("cannot remove directory {}: {}", key, e)),
                    }
                    walker.skip_current_dir();
                }
            } else if matches_any(&tasks.remove_files, &key) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => {
                        debug!("Removed file {}", key);
                        report.removed_files.push(key);
                    }
                    Err(e) => report.warnings.push(format!("cannot remove file {}: {}", key, e)),
                }
            }
        }
    }

    fn expire_old_files(&self, dir: &DirectoryRule, now: SystemTime, report: &mut CleanupReport) {
        let max_age = DAY * dir.keep_days;
        let roots: Vec<PathBuf> = WalkDir::new(&self.app_dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .filter_map(|e| {
                let rel = e.path().strip_prefix(&self.app_dir).ok()?;
                dir.pattern.matches(&match_key(rel)).then(|| e.path().to_path_buf())
            })
            .collect();

        for root in roots {
            for entry in WalkDir::new(&root).min_depth(1).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let expired = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .and_then(|modified| now.duration_since(modified).ok())
                    .is_some_and(|age| age > max_age);
                if !expired {
                    continue;
                }
                let key = relative_key(&self.app_dir, entry.path());
                match fs::remove_file(entry.path()) {
                    Ok(()) => report.expired_files.push(key),
                    Err(e) => report.warnings.push(format!("cannot expire {}: {}", key, e)),
                }
            }
        }
        if !report.expired_files.is_empty() {
            info!(
                "Expired {} files older than {} days under {}",
                report.expired_files.len(),
                dir.keep_days,
                dir.pattern
            );
        }
    }
}

fn matches_any(patterns: &[RulePattern], key: &str) -> bool {
    let name = key.rsplit('/').next().unwrap_or(key);
    patterns
        .iter()
        .any(|p| p.matches(key) || (!p.as_str().contains('/') && p.matches(name)))
}

fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).map(match_key).unwrap_or_else(|_| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn manifest(body: &str) -> Manifest {
        Manifest::parse(&format!("version: '1.0.0'\nfiles: {{}}\n{}", body)).unwrap()
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn test_remove_files_and_directories() {
        let temp = TempDir::new().unwrap();
        let app = temp.path();
        touch(app, "app.pyc");
        touch(app, "lib/mod.pyc");
        touch(app, "lib/mod.py");
        touch(app, "lib/__pycache__/mod.cpython.pyc");
        touch(app, "data/keep.pyc");

        let m = manifest(
            "directories:\n  data:\n    preserve: true\ncleanup:\n  remove_files: ['*.pyc']\n  remove_directories: [__pycache__]\n",
        );
        let report = CleanupRunner::new(app).run(&m);

        assert_eq!(report.removed_dirs, vec!["lib/__pycache__".to_string()]);
        assert_eq!(report.removed_files, vec!["app.pyc".to_string(), "lib/mod.pyc".to_string()]);
        assert!(app.join("lib/mod.py").exists());
        assert!(app.join("data/keep.pyc").exists());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_expire_old_files() {
        let temp = TempDir::new().unwrap();
        let app = temp.path();
        touch(app, "logs/old.log");
        touch(app, "logs/new.log");
        let ten_days_ago = SystemTime::now() - DAY * 10;
        File::options()
            .write(true)
            .open(app.join("logs/old.log"))
            .unwrap()
            .set_modified(ten_days_ago)
            .unwrap();

        let m = manifest("directories:\n  logs:\n    preserve: true\n    cleanup_old: true\n    keep_days: 7\n");
        let report = CleanupRunner::new(app).run(&m);

        assert_eq!(report.expired_files, vec!["logs/old.log".to_string()]);
        assert!(app.join("logs/new.log").exists());
    }

    #[test]
    fn test_failing_command_is_warning() {
        let temp = TempDir::new().unwrap();
        let m = manifest("directories: {}\ncleanup:\n  commands: ['touch done', 'exit 4']\n");

        let report = CleanupRunner::new(temp.path()).run(&m);

        assert!(temp.path().join("done").exists());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("exit 4"));
    }
}
