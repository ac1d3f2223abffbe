// src/pipeline/apply.rs

//! APPLYING: build the new tree next to the live one and swap it in
//!
//! The stage starts as a copy of the live tree. Plan entries are applied to
//! the stage in path order, and only a fully applied stage replaces the live
//! directory. A failing entry aborts with [`Error::Apply`] before the swap,
//! leaving the live tree as it was.

use crate::error::{Error, Result};
use crate::filesystem::path::{safe_join, sanitize_path};
use crate::filesystem::{self, copy_tree, sibling, swap_in};
use crate::manifest::{FileAction, Manifest};
use crate::merge::MergeEngine;
use crate::resolver::{ActionPlan, ResolvedAction};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix of per-file copies kept by `backup_replace` and `backup: true`
pub const BACKUP_SUFFIX: &str = ".backup";

/// What APPLYING did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub replaced: usize,
    pub merged: usize,
    pub skipped: usize,
    /// Merges that failed and left the installed file alone
    pub degraded: Vec<String>,
    pub backup_copies: Vec<String>,
}

pub struct ApplyStep<'a> {
    app_dir: &'a Path,
    release_root: &'a Path,
    manifest: &'a Manifest,
    merger: MergeEngine,
}

impl<'a> ApplyStep<'a> {
    pub fn new(app_dir: &'a Path, release_root: &'a Path, manifest: &'a Manifest) -> Self {
        Self {
            app_dir,
            release_root,
            manifest,
            merger: MergeEngine::new(),
        }
    }

    /// Apply `plan` and swap the result in
    pub fn run(&self, plan: &ActionPlan, run_id: &str) -> Result<ApplyReport> {
        let stage = sibling(self.app_dir, &format!("ship-stage-{}", run_id));
        let retired = sibling(self.app_dir, &format!("ship-old-{}", run_id));
        filesystem::remove_any(&stage)?;

        let report = match self.build_stage(plan, &stage) {
            Ok(report) => report,
            Err(e) => {
                if let Err(cleanup) = filesystem::remove_any(&stage) {
                    warn!("Could not remove {}: {}", stage.display(), cleanup);
                }
                return Err(e);
            }
        };

        if let Err(e) = swap_in(self.app_dir, &stage, &retired) {
            let _ = filesystem::remove_any(&stage);
            return Err(Error::apply(self.app_dir, format!("cannot swap in new tree: {}", e)));
        }
        if let Err(e) = filesystem::remove_any(&retired) {
            warn!("Could not remove {}: {}", retired.display(), e);
        }

        info!(
            "Applied {} replaced, {} merged, {} skipped",
            report.replaced, report.merged, report.skipped
        );
        Ok(report)
    }

    fn build_stage(&self, plan: &ActionPlan, stage: &Path) -> Result<ApplyReport> {
        if self.app_dir.exists() {
            copy_tree(self.app_dir, stage, |_| false)?;
        } else {
            fs::create_dir_all(stage)?;
        }

        let mut report = ApplyReport::default();
        for (key, action) in plan.iter() {
            self.apply_one(stage, key, action, &mut report)?;
        }
        Ok(report)
    }

    fn apply_one(&self, stage: &Path, key: &str, action: &ResolvedAction, report: &mut ApplyReport) -> Result<()> {
        let source = entry_path(self.release_root, &action.path)?;
        let target = entry_path(stage, &action.path)?;

        match &action.action {
            FileAction::Skip => {
                debug!("skip {}", key);
                report.skipped += 1;
            }
            FileAction::Replace | FileAction::BackupReplace => {
                check_target(&target, key)?;
                if action.keeps_backup_copy() {
                    self.keep_copy(&target, key, report)?;
                }
                install(&source, &target).map_err(|e| Error::apply(&action.path, e))?;
                debug!("replace {}", key);
                report.replaced += 1;
            }
            FileAction::Merge { format, strategy } => {
                check_target(&target, key)?;
                let overrides = self.manifest.section_overrides(key);
                match self.merger.merge_files(*format, &target, &source, strategy, &overrides) {
                    Ok(merged) => {
                        if action.keeps_backup_copy() {
                            self.keep_copy(&target, key, report)?;
                        }
                        filesystem::write_atomic(&target, &merged).map_err(|e| Error::apply(&action.path, e))?;
                        debug!("merge {} ({} {})", key, format, strategy.name());
                        report.merged += 1;
                    }
                    Err(e) => {
                        warn!("{}; leaving {} untouched", e, key);
                        report.degraded.push(key.to_string());
                        report.skipped += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn keep_copy(&self, target: &Path, key: &str, report: &mut ApplyReport) -> Result<()> {
        if !target.is_file() {
            return Ok(());
        }
        let copy = backup_copy_path(target);
        fs::copy(target, &copy).map_err(|e| Error::apply(key, format!("cannot keep {}: {}", copy.display(), e)))?;
        report.backup_copies.push(format!("{}{}", key, BACKUP_SUFFIX));
        Ok(())
    }
}

/// `root`-relative path whose parent directory must stay inside `root`
///
/// The final component is not resolved, so a symlink entry is handled as
/// the link itself.
fn entry_path(root: &Path, rel: &Path) -> Result<PathBuf> {
    let clean = sanitize_path(rel)?;
    let name = clean
        .file_name()
        .ok_or_else(|| Error::InvalidPath(rel.display().to_string()))?;
    let dir = match clean.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => safe_join(root, parent)?,
        _ => root.to_path_buf(),
    };
    Ok(dir.join(name))
}

/// A release file never replaces an installed directory
fn check_target(target: &Path, key: &str) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => Err(Error::apply(
            key,
            "installed path is a directory; refusing to replace it with a file",
        )),
        _ => Ok(()),
    }
}

fn backup_copy_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Copy one release entry into place, keeping mode or symlink target
fn install(source: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let meta = fs::symlink_metadata(source)?;
    if let Ok(existing) = fs::symlink_metadata(target)
        && !existing.is_dir()
    {
        fs::remove_file(target)?;
    }
    if meta.file_type().is_symlink() {
        std::os::unix::fs::symlink(fs::read_link(source)?, target)?;
    } else {
        fs::copy(source, target)?;
    }
    Ok(())
}
