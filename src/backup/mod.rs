// src/backup/mod.rs

//! Application snapshots for rollback
//!
//! Each backup is a full copy of the application tree taken right before an
//! update touches it:
//!
//! ```text
//! <backup_dir>/
//!   000012-2.0.3/
//!     backup.json     metadata, including a SHA-256 per file
//!     tree/           copy of the application directory
//!   000013-2.1.0.partial/   in progress, never listed
//! ```
//!
//! Sequence numbers only grow. Directories marked `preserve: true, backup:
//! false` are left out of the copy and carried over from the live tree when
//! a backup is restored.

use crate::error::{Error, Result};
use crate::filesystem::path::match_key;
use crate::filesystem::{self, copy_tree, sibling, swap_in};
use crate::manifest::{DirectoryRule, HookCommand};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cell::RefCell;
use std::ffi::OsString;
use std::fmt;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Metadata file inside each backup
pub const METADATA_FILE: &str = "backup.json";
const TREE_DIR: &str = "tree";
const PARTIAL_SUFFIX: &str = ".partial";
const MB: u64 = 1024 * 1024;
/// Free space demanded on top of `min_disk_space_mb`
const DISK_SAFETY_FACTOR: u64 = 2;

/// A rollback hook as recorded at snapshot time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredHook {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
}

impl From<&HookCommand> for StoredHook {
    fn from(hook: &HookCommand) -> Self {
        Self {
            command: hook.command.clone(),
            timeout_secs: hook.timeout.map(|t| t.as_secs_f64()),
        }
    }
}

impl From<&StoredHook> for HookCommand {
    fn from(hook: &StoredHook) -> Self {
        Self {
            command: hook.command.clone(),
            timeout: hook.timeout_secs.map(Duration::from_secs_f64),
        }
    }
}

/// A tree-relative path as stored in `backup.json`
///
/// UTF-8 paths are written as strings and anything else as its raw bytes,
/// so every name the filesystem accepts comes back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RecordedPath(pub PathBuf);

impl RecordedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for RecordedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl Serialize for RecordedPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0.to_str() {
            Some(text) => serializer.serialize_str(text),
            None => serializer.collect_seq(self.0.as_os_str().as_bytes()),
        }
    }
}

impl<'de> Deserialize<'de> for RecordedPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Bytes(Vec<u8>),
        }
        Ok(Self(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => PathBuf::from(text),
            Raw::Bytes(bytes) => PathBuf::from(OsString::from_vec(bytes)),
        }))
    }
}

/// One entry of the snapshot with its digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFile {
    pub path: RecordedPath,
    /// SHA-256 for a regular file, `link:<target>` for a symlink, or
    /// `link-bytes:<hex>` when the target is not UTF-8
    pub digest: String,
}

/// Contents of `backup.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMeta {
    pub id: String,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    /// Version installed when the snapshot was taken
    pub app_version: Option<String>,
    /// Version the update was about to install
    pub target_version: String,
    pub run_id: String,
    #[serde(default)]
    pub rollback_hooks: Vec<StoredHook>,
    /// Relative paths left out of the copy
    #[serde(default)]
    pub excluded: Vec<RecordedPath>,
    /// Every entry of the stored tree, ordered by path
    pub files: Vec<RecordedFile>,
}

/// A completed backup on disk
#[derive(Debug, Clone)]
pub struct Backup {
    pub root: PathBuf,
    pub meta: BackupMeta,
}

impl Backup {
    pub fn tree(&self) -> PathBuf {
        self.root.join(TREE_DIR)
    }

    /// Load a backup directory
    pub fn open(root: &Path) -> Result<Self> {
        let meta_path = root.join(METADATA_FILE);
        let raw = fs::read_to_string(&meta_path)
            .map_err(|e| Error::Rollback(format!("cannot read {}: {}", meta_path.display(), e)))?;
        let meta: BackupMeta = serde_json::from_str(&raw)
            .map_err(|e| Error::Rollback(format!("corrupt {}: {}", meta_path.display(), e)))?;
        Ok(Self {
            root: root.to_path_buf(),
            meta,
        })
    }

    /// Rollback hooks recorded with this backup
    pub fn rollback_hooks(&self) -> Vec<HookCommand> {
        self.meta.rollback_hooks.iter().map(HookCommand::from).collect()
    }

    /// Check every recorded digest against the stored tree
    pub fn verify(&self) -> Result<()> {
        let tree = self.tree();
        for file in &self.meta.files {
            let actual = entry_digest(&tree.join(file.path.as_path()))
                .map_err(|e| Error::Rollback(format!("backup {} is missing {}: {}", self.meta.id, file.path, e)))?;
            if actual != file.digest {
                return Err(Error::Rollback(format!(
                    "backup {} is corrupt: {} does not match its recorded digest",
                    self.meta.id, file.path
                )));
            }
        }
        Ok(())
    }
}

/// Inputs for one snapshot
#[derive(Debug, Clone, Copy)]
pub struct SnapshotRequest<'a> {
    pub app_version: Option<&'a str>,
    pub target_version: &'a str,
    pub run_id: &'a str,
    pub rollback_hooks: &'a [HookCommand],
    pub directories: &'a [DirectoryRule],
    pub min_disk_space_mb: u64,
}

/// Owns the backup directory: creation, listing, restore and retention
pub struct BackupManager {
    backup_dir: PathBuf,
    app_dir: PathBuf,
}

impl BackupManager {
    pub fn new(backup_dir: impl Into<PathBuf>, app_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            app_dir: app_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Snapshot the application tree
    pub fn create(&self, request: &SnapshotRequest<'_>) -> Result<Backup> {
        fs::create_dir_all(&self.backup_dir)
            .map_err(|e| Error::Backup(format!("cannot create {}: {}", self.backup_dir.display(), e)))?;

        self.check_space(request.min_disk_space_mb)?;

        let sequence = self.next_sequence()?;
        let id = format!(
            "{:06}-{}",
            sequence,
            sanitize_id(request.app_version.unwrap_or("unknown"))
        );
        let partial = self.backup_dir.join(format!("{}{}", id, PARTIAL_SUFFIX));
        let root = self.backup_dir.join(&id);

        info!("Creating backup {} of {}", id, self.app_dir.display());
        match self.write_snapshot(&partial, &id, sequence, request) {
            Ok(meta) => {
                fs::rename(&partial, &root).map_err(|e| {
                    let _ = filesystem::remove_any(&partial);
                    Error::Backup(format!("cannot finalize backup {}: {}", id, e))
                })?;
                info!("Backup {} complete ({} files)", id, meta.files.len());
                Ok(Backup { root, meta })
            }
            Err(e) => {
                if let Err(cleanup) = filesystem::remove_any(&partial) {
                    warn!("Could not remove partial backup {}: {}", partial.display(), cleanup);
                }
                Err(match e {
                    Error::Backup(_) => e,
                    other => Error::Backup(other.to_string()),
                })
            }
        }
    }

    fn check_space(&self, min_disk_space_mb: u64) -> Result<()> {
        let tree_size = if self.app_dir.exists() {
            filesystem::tree_size(&self.app_dir)?
        } else {
            0
        };
        let needed = min_disk_space_mb
            .saturating_mul(MB)
            .saturating_mul(DISK_SAFETY_FACTOR)
            .max(tree_size);
        let available = filesystem::available_space(&self.backup_dir)?;
        debug!("Backup needs {} bytes, {} available", needed, available);

        if available < needed {
            return Err(Error::Backup(format!(
                "insufficient disk space in {}: {} MB available, {} MB needed",
                self.backup_dir.display(),
                available / MB,
                needed.div_ceil(MB)
            )));
        }
        Ok(())
    }

    fn write_snapshot(
        &self,
        partial: &Path,
        id: &str,
        sequence: u64,
        request: &SnapshotRequest<'_>,
    ) -> Result<BackupMeta> {
        if partial.exists() {
            filesystem::remove_any(partial)?;
        }
        let tree = partial.join(TREE_DIR);
        fs::create_dir_all(&tree)?;

        let excluded = RefCell::new(Vec::new());
        if self.app_dir.exists() {
            copy_tree(&self.app_dir, &tree, |rel| {
                let key = match_key(rel);
                let skip = request
                    .directories
                    .iter()
                    .any(|dir| !dir.backup && dir.pattern.matches(&key));
                if skip {
                    excluded.borrow_mut().push(RecordedPath(rel.to_path_buf()));
                }
                skip
            })?;
        }

        let mut files = Vec::new();
        for rel in filesystem::list_files(&tree)? {
            let digest = entry_digest(&tree.join(&rel))?;
            files.push(RecordedFile {
                path: RecordedPath(rel),
                digest,
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let meta = BackupMeta {
            id: id.to_string(),
            sequence,
            created_at: Utc::now(),
            app_version: request.app_version.map(str::to_string),
            target_version: request.target_version.to_string(),
            run_id: request.run_id.to_string(),
            rollback_hooks: request.rollback_hooks.iter().map(StoredHook::from).collect(),
            excluded: excluded.into_inner(),
            files,
        };
        let json = serde_json::to_vec_pretty(&meta).map_err(|e| Error::Backup(e.to_string()))?;
        filesystem::write_atomic(&partial.join(METADATA_FILE), &json)?;
        Ok(meta)
    }

    fn next_sequence(&self) -> Result<u64> {
        let mut highest = 0;
        for entry in fs::read_dir(&self.backup_dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(seq) = name.split('-').next().and_then(|s| s.parse::<u64>().ok()) {
                highest = highest.max(seq);
            }
        }
        Ok(highest + 1)
    }

    /// Completed backups, oldest first
    pub fn list(&self) -> Result<Vec<Backup>> {
        let mut backups = Vec::new();
        if !self.backup_dir.exists() {
            return Ok(backups);
        }
        for entry in fs::read_dir(&self.backup_dir)? {
            let path = entry?.path();
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            if !path.is_dir() || name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            match Backup::open(&path) {
                Ok(backup) => backups.push(backup),
                Err(e) => warn!("Ignoring {}: {}", path.display(), e),
            }
        }
        backups.sort_by_key(|b| b.meta.sequence);
        Ok(backups)
    }

    /// The rollback target for the current run
    pub fn latest(&self) -> Result<Option<Backup>> {
        Ok(self.list()?.pop())
    }

    /// Remove leftovers of snapshots that never completed
    pub fn remove_partials(&self) -> Result<usize> {
        let mut removed = 0;
        if !self.backup_dir.exists() {
            return Ok(0);
        }
        for entry in fs::read_dir(&self.backup_dir)? {
            let path = entry?.path();
            if path.to_string_lossy().ends_with(PARTIAL_SUFFIX) {
                warn!("Removing incomplete backup {}", path.display());
                filesystem::remove_any(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Replace the application tree with `backup`
    ///
    /// The restored tree is built in a sibling directory and swapped in with
    /// renames, so the live path holds either the old or the restored tree.
    /// Every failure here is a [`Error::Rollback`].
    pub fn restore(&self, backup: &Backup, run_id: &str) -> Result<()> {
        info!("Restoring backup {} into {}", backup.meta.id, self.app_dir.display());
        backup.verify()?;

        let rollback_err = |what: &str, e: &dyn std::fmt::Display| {
            Error::Rollback(format!("{} while restoring {}: {}", what, backup.meta.id, e))
        };

        let stage = sibling(&self.app_dir, &format!("ship-stage-{}", run_id));
        let retired = sibling(&self.app_dir, &format!("ship-old-{}", run_id));
        for leftover in [&stage, &retired] {
            filesystem::remove_any(leftover).map_err(|e| rollback_err("clearing scratch space", &e))?;
        }

        copy_tree(&backup.tree(), &stage, |_| false).map_err(|e| rollback_err("staging backup", &e))?;

        let carried = self
            .carry_over_excluded(&backup.meta.excluded, &stage)
            .map_err(|e| rollback_err("carrying over excluded directories", &e))?;

        if let Err(e) = swap_in(&self.app_dir, &stage, &retired) {
            for rel in &carried {
                if let Err(undo) = fs::rename(stage.join(rel), self.app_dir.join(rel)) {
                    error!("Could not move {} back into the live tree: {}", rel.display(), undo);
                }
            }
            let _ = filesystem::remove_any(&stage);
            return Err(rollback_err("swapping directories", &e));
        }

        if let Err(e) = filesystem::remove_any(&retired) {
            warn!("Could not remove {}: {}", retired.display(), e);
        }
        info!("Backup {} restored", backup.meta.id);
        Ok(())
    }

    fn carry_over_excluded(&self, excluded: &[RecordedPath], stage: &Path) -> Result<Vec<PathBuf>> {
        let mut carried = Vec::new();
        for rel in excluded.iter().map(RecordedPath::as_path) {
            let live = self.app_dir.join(rel);
            if !live.exists() {
                continue;
            }
            let target = stage.join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            filesystem::remove_any(&target)?;
            fs::rename(&live, &target)?;
            debug!("Carried {} over from the live tree", rel.display());
            carried.push(rel.to_path_buf());
        }
        Ok(carried)
    }

    /// Delete the oldest backups beyond `keep`
    pub fn prune(&self, keep: usize) -> Result<Vec<String>> {
        let backups = self.list()?;
        let excess = backups.len().saturating_sub(keep);
        let mut removed = Vec::new();

        for backup in backups.into_iter().take(excess) {
            info!("Pruning backup {}", backup.meta.id);
            filesystem::remove_any(&backup.root)?;
            removed.push(backup.meta.id);
        }
        Ok(removed)
    }
}

fn entry_digest(path: &Path) -> std::io::Result<String> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(path)?;
        return Ok(match target.to_str() {
            Some(text) => format!("link:{}", text),
            None => format!("link-bytes:{}", hex::encode(target.as_os_str().as_bytes())),
        });
    }
    filesystem::file_digest(path).map_err(|e| match e {
        Error::Io(io) => io,
        other => std::io::Error::other(other.to_string()),
    })
}

fn sanitize_id(version: &str) -> String {
    version
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::RulePattern;
    use std::collections::BTreeMap;
    use std::ffi::OsStr;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn request<'a>(directories: &'a [DirectoryRule]) -> SnapshotRequest<'a> {
        SnapshotRequest {
            app_version: Some("1.0.0"),
            target_version: "2.0.0",
            run_id: "run-1",
            rollback_hooks: &[],
            directories,
            min_disk_space_mb: 0,
        }
    }

    fn app(temp: &TempDir) -> PathBuf {
        let app = temp.path().join("app");
        fs::create_dir_all(app.join("config")).unwrap();
        fs::create_dir_all(app.join("data")).unwrap();
        fs::write(app.join("app.py"), "print(1)\n").unwrap();
        fs::write(app.join("config/settings.toml"), "a = 1\n").unwrap();
        fs::write(app.join("data/db.sqlite"), vec![1u8; 128]).unwrap();
        fs::set_permissions(app.join("app.py"), fs::Permissions::from_mode(0o750)).unwrap();
        app
    }

    fn snapshot_of(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        filesystem::list_files(root)
            .unwrap()
            .into_iter()
            .map(|rel| {
                let content = fs::read(root.join(&rel)).unwrap();
                (rel, content)
            })
            .collect()
    }

    #[test]
    fn test_create_and_list() {
        let temp = TempDir::new().unwrap();
        let app = app(&temp);
        let manager = BackupManager::new(temp.path().join("backups"), &app);

        let first = manager.create(&request(&[])).unwrap();
        let second = manager.create(&request(&[])).unwrap();

        assert_eq!(first.meta.id, "000001-1.0.0");
        assert_eq!(second.meta.sequence, 2);
        assert_eq!(first.meta.files.len(), 3);
        assert_eq!(manager.list().unwrap().len(), 2);
        assert_eq!(manager.latest().unwrap().unwrap().meta.sequence, 2);
    }

    #[test]
    fn test_restore_round_trip_is_byte_identical() {
        let temp = TempDir::new().unwrap();
        let app = app(&temp);
        let manager = BackupManager::new(temp.path().join("backups"), &app);
        let before = snapshot_of(&app);

        let backup = manager.create(&request(&[])).unwrap();
        fs::write(app.join("app.py"), "print(2)\n").unwrap();
        fs::remove_file(app.join("config/settings.toml")).unwrap();
        fs::write(app.join("new.txt"), "x").unwrap();

        manager.restore(&backup, "run-1").unwrap();

        assert_eq!(snapshot_of(&app), before);
        let mode = fs::metadata(app.join("app.py")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
        assert!(!sibling(&app, "ship-old-run-1").exists());
        assert!(!sibling(&app, "ship-stage-run-1").exists());
    }

    #[test]
    fn test_excluded_directory_carried_over() {
        let temp = TempDir::new().unwrap();
        let app = app(&temp);
        let manager = BackupManager::new(temp.path().join("backups"), &app);
        let dirs = vec![DirectoryRule {
            pattern: RulePattern::new("data").unwrap(),
            preserve: true,
            cleanup_old: false,
            keep_days: 30,
            backup: false,
        }];

        let backup = manager.create(&request(&dirs)).unwrap();
        assert_eq!(backup.meta.excluded, vec![RecordedPath(PathBuf::from("data"))]);
        assert!(!backup.tree().join("data").exists());

        // Live data written after the snapshot survives a restore
        fs::write(app.join("data/db.sqlite"), vec![2u8; 16]).unwrap();
        manager.restore(&backup, "run-2").unwrap();

        assert_eq!(fs::read(app.join("data/db.sqlite")).unwrap(), vec![2u8; 16]);
        assert!(app.join("app.py").exists());
    }

    #[test]
    fn test_restore_keeps_non_utf8_names() {
        let temp = TempDir::new().unwrap();
        let app = app(&temp);
        let name = OsStr::from_bytes(b"r\xe9sum\xe9.txt");
        fs::write(app.join(name), "cv\n").unwrap();
        fs::write(app.join(OsStr::from_bytes(b"r\xe8sum\xe8.txt")), "other\n").unwrap();
        let manager = BackupManager::new(temp.path().join("backups"), &app);
        let before = snapshot_of(&app);

        let backup = manager.create(&request(&[])).unwrap();
        assert_eq!(backup.meta.files.len(), 5);
        fs::remove_file(app.join(name)).unwrap();

        // Metadata survives the trip through backup.json
        let reopened = Backup::open(&backup.root).unwrap();
        assert!(reopened.meta.files.iter().any(|f| f.path.as_path() == Path::new(name)));
        manager.restore(&reopened, "run-3").unwrap();

        assert_eq!(snapshot_of(&app), before);
    }

    #[test]
    fn test_oversized_space_requirement_saturates() {
        let temp = TempDir::new().unwrap();
        let app = app(&temp);
        let manager = BackupManager::new(temp.path().join("backups"), &app);
        let mut req = request(&[]);
        req.min_disk_space_mb = 10_000_000_000_000;

        let err = manager.create(&req).unwrap_err();
        assert!(matches!(err, Error::Backup(_)), "{:?}", err);
    }

    #[test]
    fn test_corrupt_backup_refused() {
        let temp = TempDir::new().unwrap();
        let app = app(&temp);
        let manager = BackupManager::new(temp.path().join("backups"), &app);
        let backup = manager.create(&request(&[])).unwrap();

        fs::write(backup.tree().join("app.py"), "tampered").unwrap();
        fs::write(app.join("app.py"), "live").unwrap();

        let err = manager.restore(&backup, "run-1").unwrap_err();
        assert!(matches!(err, Error::Rollback(_)));
        assert_eq!(fs::read_to_string(app.join("app.py")).unwrap(), "live");
    }

    #[test]
    fn test_insufficient_space_fails_before_copy() {
        let temp = TempDir::new().unwrap();
        let app = app(&temp);
        let manager = BackupManager::new(temp.path().join("backups"), &app);
        let mut req = request(&[]);
        req.min_disk_space_mb = u64::MAX / (MB * 4);

        let err = manager.create(&req).unwrap_err();
        assert!(matches!(err, Error::Backup(_)));
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let temp = TempDir::new().unwrap();
        let app = app(&temp);
        let manager = BackupManager::new(temp.path().join("backups"), &app);
        for _ in 0..4 {
            manager.create(&request(&[])).unwrap();
        }

        let removed = manager.prune(2).unwrap();

        assert_eq!(removed, vec!["000001-1.0.0".to_string(), "000002-1.0.0".to_string()]);
        let left: Vec<u64> = manager.list().unwrap().iter().map(|b| b.meta.sequence).collect();
        assert_eq!(left, vec![3, 4]);
    }

    #[test]
    fn test_partials_ignored_and_removed() {
        let temp = TempDir::new().unwrap();
        let app = app(&temp);
        let backups = temp.path().join("backups");
        fs::create_dir_all(backups.join("000007-1.0.0.partial/tree")).unwrap();
        let manager = BackupManager::new(&backups, &app);

        assert!(manager.list().unwrap().is_empty());
        // Sequence continues past the abandoned attempt
        assert_eq!(manager.create(&request(&[])).unwrap().meta.sequence, 8);
        assert_eq!(manager.remove_partials().unwrap(), 1);
    }

    #[test]
    fn test_rollback_hooks_recorded() {
        let temp = TempDir::new().unwrap();
        let app = app(&temp);
        let manager = BackupManager::new(temp.path().join("backups"), &app);
        let hooks = vec![HookCommand {
            command: "systemctl restart myapp".to_string(),
            timeout: Some(Duration::from_secs(30)),
        }];
        let mut req = request(&[]);
        req.rollback_hooks = &hooks;

        let backup = manager.create(&req).unwrap();
        let reopened = Backup::open(&backup.root).unwrap();

        assert_eq!(reopened.rollback_hooks(), hooks);
    }

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("v1.2.0+build/7"), "v1.2.0_build_7");
    }
}
