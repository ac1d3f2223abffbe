// src/resolver/mod.rs

//! File rule resolution
//!
//! Resolution runs in two passes over the staged file list. Directory rules
//! go first and mark every path inside a preserved directory; those paths
//! are fixed to `skip` and never reach a file rule. Remaining paths take the
//! most specific matching file rule, with declaration order breaking exact
//! ties, or default to `replace`. Nothing here touches the filesystem.

mod plan;

pub use plan::{ActionPlan, PlanSummary, Resolution, ResolvedAction};

use crate::filesystem::path::match_key;
use crate::manifest::{DirectoryRule, FileAction, FileRule, Manifest};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct RuleResolver<'m> {
    manifest: &'m Manifest,
}

impl<'m> RuleResolver<'m> {
    pub fn new(manifest: &'m Manifest) -> Self {
        Self { manifest }
    }

    /// Preserved directory rule covering `key`, if any
    pub fn preserving_rule(&self, key: &str) -> Option<&'m DirectoryRule> {
        self.manifest
            .directories
            .iter()
            .find(|dir| dir.preserve && dir.contains(key))
    }

    /// Most specific file rule matching `key`, with its declaration index
    pub fn matching_rule(&self, key: &str) -> Option<(usize, &'m FileRule)> {
        let mut best: Option<(usize, &FileRule)> = None;
        for (index, rule) in self.manifest.files.iter().enumerate() {
            if !rule.pattern.matches(key) {
                continue;
            }
            // Strictly greater only, so the earlier rule wins a tie
            match best {
                Some((_, current)) if rule.pattern.specificity() <= current.pattern.specificity() => {}
                _ => best = Some((index, rule)),
            }
        }
        best
    }

    /// Build the plan for a list of release-relative paths
    pub fn resolve(&self, paths: &[PathBuf]) -> ActionPlan {
        let keys: Vec<(String, &Path)> = paths.iter().map(|p| (match_key(p), p.as_path())).collect();

        let preserved: HashMap<&Path, &DirectoryRule> = keys
            .iter()
            .filter_map(|(key, path)| self.preserving_rule(key).map(|rule| (*path, rule)))
            .collect();

        let mut plan = ActionPlan::default();
        for (key, path) in &keys {
            let resolved = match preserved.get(path) {
                Some(dir) => ResolvedAction {
                    path: path.to_path_buf(),
                    key: key.clone(),
                    action: FileAction::Skip,
                    backup: false,
                    resolution: Resolution::Preserved {
                        directory: dir.pattern.to_string(),
                    },
                },
                None => self.resolve_unpreserved(key, path),
            };
            debug!("{} -> {} ({:?})", key, resolved.action.name(), resolved.resolution);
            plan.insert(resolved);
        }
        plan
    }

    fn resolve_unpreserved(&self, key: &str, path: &Path) -> ResolvedAction {
        match self.matching_rule(key) {
            Some((index, rule)) => ResolvedAction {
                path: path.to_path_buf(),
                key: key.to_string(),
                action: rule.action.clone(),
                backup: rule.backup,
                resolution: Resolution::Rule {
                    index,
                    pattern: rule.pattern.to_string(),
                },
            },
            None => ResolvedAction {
                path: path.to_path_buf(),
                key: key.to_string(),
                action: FileAction::Replace,
                backup: false,
                resolution: Resolution::Default,
            },
        }
    }
}
