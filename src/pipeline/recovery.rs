// src/pipeline/recovery.rs

//! Recovery of directory swaps interrupted by a crash
//!
//! A swap renames the live tree to `.<app>.ship-old-<run>` and then renames
//! `.<app>.ship-stage-<run>` into place. A crash between the two renames
//! leaves no live tree at all. The retired tree is the last known-good state
//! and is moved back; stage and retired leftovers are then removed.

use crate::error::{Error, Result};
use crate::filesystem;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const OLD_TAG: &str = "ship-old-";
const STAGE_TAG: &str = "ship-stage-";

/// What startup recovery found and did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No leftovers
    Clean,
    /// Live tree was missing and the retired tree was moved back
    Restored { from: PathBuf, removed: Vec<PathBuf> },
    /// Live tree intact; leftovers removed
    RemovedLeftovers(Vec<PathBuf>),
}

/// Repair the application directory after an interrupted run
pub fn recover_interrupted_swap(app_dir: &Path) -> Result<RecoveryOutcome> {
    let (mut retired, staged) = leftovers(app_dir)?;

    let mut restored = None;
    if !app_dir.exists() && !retired.is_empty() {
        if retired.len() > 1 {
            return Err(Error::Rollback(format!(
                "{} is missing and {} retired trees exist; cannot tell which to restore",
                app_dir.display(),
                retired.len()
            )));
        }
        let from = retired.remove(0);
        warn!(
            "{} is missing after an interrupted swap; moving {} back",
            app_dir.display(),
            from.display()
        );
        fs::rename(&from, app_dir).map_err(|e| {
            Error::Rollback(format!("cannot move {} back into place: {}", from.display(), e))
        })?;
        restored = Some(from);
    }

    let mut removed = Vec::new();
    for leftover in retired.into_iter().chain(staged) {
        info!("Removing leftover {}", leftover.display());
        filesystem::remove_any(&leftover)?;
        removed.push(leftover);
    }

    Ok(match restored {
        Some(from) => RecoveryOutcome::Restored { from, removed },
        None if removed.is_empty() => RecoveryOutcome::Clean,
        None => RecoveryOutcome::RemovedLeftovers(removed),
    })
}

/// Retired and stage siblings of `app_dir`, sorted by name
fn leftovers(app_dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let Some(name) = app_dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok((Vec::new(), Vec::new()));
    };
    let parent = app_dir.parent().unwrap_or(Path::new("."));
    if !parent.is_dir() {
        return Ok((Vec::new(), Vec::new()));
    }

    let old_prefix = format!(".{}.{}", name, OLD_TAG);
    let stage_prefix = format!(".{}.{}", name, STAGE_TAG);
    let mut retired = Vec::new();
    let mut staged = Vec::new();

    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        let entry_name = entry.file_name().to_string_lossy().into_owned();
        if entry_name.starts_with(&old_prefix) {
            retired.push(entry.path());
        } else if entry_name.starts_with(&stage_prefix) {
            staged.push(entry.path());
        }
    }
    retired.sort();
    staged.sort();
    Ok((retired, staged))
}
