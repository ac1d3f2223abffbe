// src/resolver/plan.rs

//! Action plan data structures
//!
//! Contains the result types for rule resolution.

use crate::manifest::FileAction;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Why a path received its action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Matched `files:` rule at this declaration index
    Rule { index: usize, pattern: String },
    /// Lies inside a preserved directory
    Preserved { directory: String },
    /// No rule matched
    Default,
}

/// The single decision for one staged path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAction {
    /// Path relative to the release root
    pub path: PathBuf,
    /// `/`-separated form of `path` used for glob matching and display
    pub key: String,
    pub action: FileAction,
    /// Keep a `<file>.backup` copy of the installed file
    pub backup: bool,
    pub resolution: Resolution,
}

impl ResolvedAction {
    pub fn keeps_backup_copy(&self) -> bool {
        self.backup || self.action == FileAction::BackupReplace
    }
}

/// Result of rule resolution, ordered by path
///
/// Entries are keyed by the real relative path, so names that are not valid
/// UTF-8 never collapse onto one another.
#[derive(Debug, Clone, Default)]
pub struct ActionPlan {
    entries: BTreeMap<PathBuf, ResolvedAction>,
}

/// Per-action counts, for logs and `--check-only` output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub replace: usize,
    pub merge: usize,
    pub skip: usize,
}

impl ActionPlan {
    pub(crate) fn insert(&mut self, action: ResolvedAction) {
        self.entries.insert(action.path.clone(), action);
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&ResolvedAction> {
        self.entries.get(path.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolvedAction)> {
        self.entries.values().map(|v| (v.key.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in self.entries.values() {
            match action.action {
                FileAction::Replace | FileAction::BackupReplace => summary.replace += 1,
                FileAction::Merge { .. } => summary.merge += 1,
                FileAction::Skip => summary.skip += 1,
            }
        }
        summary
    }
}
