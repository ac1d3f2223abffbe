// src/merge/mod.rs

//! Structured config merging
//!
//! The installed file (existing) and the release's file (incoming) are both
//! parsed and flattened to dotted-key maps. Each key is then decided on its
//! own by the strategy in force for it: the file-level strategy, or the
//! longest matching `merge_strategies.<file>.sections` override, which only
//! refines keys under its section.
//!
//! | strategy | key in both | existing only | incoming only |
//! |----------|-------------|---------------|---------------|
//! | `preserve_user` | existing | kept | added |
//! | `update_only` | existing | kept | added |
//! | `replace` | incoming | dropped | added |
//! | `merge_smart` | incoming, existing for preserved keys | kept | added |
//!
//! `update_only` and `preserve_user` agree on flat key maps; they are kept
//! as separate names because release authors use them with different intent.
//! An incoming-only key that would turn an existing value into a table (or
//! the reverse) is dropped, so user data is never overwritten structurally.
//!
//! Output is re-serialized in the source format. Comments and key order of
//! the installed file are not kept.

mod document;

pub use document::{Document, Flat};

use crate::manifest::SectionOverride;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Structured file format a merge action works on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Toml => "TOML",
            Self::Json => "JSON",
        })
    }
}

/// Per-key policy for reconciling installed and incoming config
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStrategy {
    PreserveUser,
    UpdateOnly,
    Replace,
    MergeSmart { preserve_keys: BTreeSet<String> },
}

impl MergeStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PreserveUser => "preserve_user",
            Self::UpdateOnly => "update_only",
            Self::Replace => "replace",
            Self::MergeSmart { .. } => "merge_smart",
        }
    }
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Cannot parse {side} {format} document {path}: {reason}")]
    Parse {
        format: ConfigFormat,
        side: &'static str,
        path: String,
        reason: String,
    },

    #[error("Cannot serialize merged {format} document: {reason}")]
    Render { format: ConfigFormat, reason: String },

    #[error("I/O error during merge of {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Merges one structured file at a time
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine;

impl MergeEngine {
    pub fn new() -> Self {
        Self
    }

    /// Merge the files at `existing` and `incoming`, returning the new content
    ///
    /// A missing `existing` yields the incoming bytes unchanged, as does a
    /// whole-file `replace` with no section overrides.
    pub fn merge_files(
        &self,
        format: ConfigFormat,
        existing: &Path,
        incoming: &Path,
        strategy: &MergeStrategy,
        overrides: &[&SectionOverride],
    ) -> Result<Vec<u8>, MergeError> {
        let read = |path: &Path| {
            fs::read(path).map_err(|source| MergeError::Io {
                path: path.display().to_string(),
                source,
            })
        };

        let incoming_bytes = read(incoming)?;
        if !existing.exists() {
            debug!("{} not installed yet, taking incoming content", existing.display());
            return Ok(incoming_bytes);
        }
        if *strategy == MergeStrategy::Replace && overrides.is_empty() {
            return Ok(incoming_bytes);
        }

        let decode = |bytes: Vec<u8>, side: &'static str, path: &Path| {
            String::from_utf8(bytes).map_err(|e| MergeError::Parse {
                format,
                side,
                path: path.display().to_string(),
                reason: format!("not valid UTF-8: {}", e.utf8_error()),
            })
        };
        let existing_text = decode(read(existing)?, "existing", existing)?;
        let incoming_text = decode(incoming_bytes, "incoming", incoming)?;
        let merged = self.merge_text(format, &existing_text, &incoming_text, strategy, overrides)
            .map_err(|e| match e {
                MergeError::Parse { format, side, reason, .. } => MergeError::Parse {
                    format,
                    side,
                    path: if side == "existing" { existing } else { incoming }.display().to_string(),
                    reason,
                },
                other => other,
            })?;
        Ok(merged.into_bytes())
    }

    /// Merge two documents given as text
    pub fn merge_text(
        &self,
        format: ConfigFormat,
        existing: &str,
        incoming: &str,
        strategy: &MergeStrategy,
        overrides: &[&SectionOverride],
    ) -> Result<String, MergeError> {
        match format {
            ConfigFormat::Toml => merge_documents::<toml::Value>(format, existing, incoming, strategy, overrides),
            ConfigFormat::Json => {
                merge_documents::<serde_json::Value>(format, existing, incoming, strategy, overrides)
            }
        }
    }
}

fn merge_documents<D: Document>(
    format: ConfigFormat,
    existing: &str,
    incoming: &str,
    strategy: &MergeStrategy,
    overrides: &[&SectionOverride],
) -> Result<String, MergeError> {
    let parse = |text: &str, side: &'static str| {
        D::parse_text(text).map_err(|reason| MergeError::Parse {
            format,
            side,
            path: String::new(),
            reason,
        })
    };
    let existing = parse(existing, "existing")?.flatten();
    let incoming = parse(incoming, "incoming")?.flatten();

    let merged = merge_flat(&existing, &incoming, strategy, overrides);
    D::unflatten(merged)
        .render()
        .map_err(|reason| MergeError::Render { format, reason })
}

/// Decide every key of the union of `existing` and `incoming`
pub fn merge_flat<V: Document>(
    existing: &Flat<V>,
    incoming: &Flat<V>,
    strategy: &MergeStrategy,
    overrides: &[&SectionOverride],
) -> Flat<V> {
    let keys: BTreeSet<&Vec<String>> = existing.keys().chain(incoming.keys()).collect();
    let mut merged = Flat::new();
    let mut added = Flat::new();

    for key in keys {
        let effective = strategy_for(key, strategy, overrides);
        let old = existing.get(key);
        let new = incoming.get(key);

        let value = match effective {
            MergeStrategy::PreserveUser | MergeStrategy::UpdateOnly => old.or(new),
            MergeStrategy::Replace => new,
            MergeStrategy::MergeSmart { preserve_keys } => {
                if old.is_some() && is_preserved(key, preserve_keys) {
                    old
                } else {
                    new.or(old)
                }
            }
        };

        match (value, old) {
            (Some(value), Some(_)) => {
                merged.insert(key.clone(), value.clone());
            }
            (Some(value), None) => {
                added.insert(key.clone(), value.clone());
            }
            (None, _) => {}
        }
    }

    // Keys new to the installed file must fit the structure that survived
    let kept = merged.clone();
    for (key, value) in added {
        if clashes_with_existing(&key, &kept) {
            warn!(
                "Dropping incoming key '{}': it conflicts with the structure of the installed file",
                key.join(".")
            );
            continue;
        }
        merged.insert(key, value);
    }
    merged
}

fn strategy_for<'a>(
    key: &[String],
    file_strategy: &'a MergeStrategy,
    overrides: &[&'a SectionOverride],
) -> &'a MergeStrategy {
    let dotted = key.join(".");
    overrides
        .iter()
        .copied()
        .filter(|o| dotted == o.section || dotted.starts_with(&format!("{}.", o.section)))
        .max_by_key(|o| o.section.len())
        .map(|o| &o.strategy)
        .unwrap_or(file_strategy)
}

/// A preserve key matches itself and everything below it; a bare name
/// without dots matches that key in any section
fn is_preserved(key: &[String], preserve_keys: &BTreeSet<String>) -> bool {
    let dotted = key.join(".");
    preserve_keys.iter().any(|pk| {
        dotted == *pk
            || dotted.starts_with(&format!("{}.", pk))
            || (!pk.contains('.') && key.iter().any(|segment| segment == pk))
    })
}

/// Whether `key` would nest under, or enclose, a populated existing key
fn clashes_with_existing<V: Document>(key: &[String], existing: &Flat<V>) -> bool {
    let under_existing_leaf = (1..key.len()).any(|len| {
        existing
            .get(&key[..len].to_vec())
            .is_some_and(|v| !v.is_empty_table())
    });
    let encloses_existing = existing
        .range(key.to_vec()..)
        .take_while(|(k, _)| k.starts_with(key))
        .any(|(k, _)| k.len() > key.len());
    under_existing_leaf || encloses_existing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toml_merge(existing: &str, incoming: &str, strategy: MergeStrategy) -> toml::Table {
        let out = MergeEngine::new()
            .merge_text(ConfigFormat::Toml, existing, incoming, &strategy, &[])
            .unwrap();
        out.parse::<toml::Table>().unwrap()
    }

    fn smart(keys: &[&str]) -> MergeStrategy {
        MergeStrategy::MergeSmart {
            preserve_keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn test_preserve_user_keeps_existing_values() {
        let merged = toml_merge("a = 1\nb = 2\n", "b = 3\nc = 4\n", MergeStrategy::PreserveUser);
        assert_eq!(merged, "a = 1\nb = 2\nc = 4\n".parse::<toml::Table>().unwrap());
    }

    #[test]
    fn test_update_only_never_changes_existing() {
        let merged = toml_merge("a = 1\nb = 2\n", "b = 3\nc = 4\n", MergeStrategy::UpdateOnly);
        assert_eq!(merged, "a = 1\nb = 2\nc = 4\n".parse::<toml::Table>().unwrap());

        let merged = toml_merge("a = 1\nb = 2\n", "b = 3\n", MergeStrategy::UpdateOnly);
        assert_eq!(merged, "a = 1\nb = 2\n".parse::<toml::Table>().unwrap());
    }

    #[test]
    fn test_merge_smart_incoming_wins_except_preserved() {
        let existing = "[database]\nhost = 'db.local'\npassword = 'secret'\n[server]\nport = 8080\n";
        let incoming = "[database]\nhost = 'db.new'\npassword = 'changeme'\npool = 10\n[server]\nport = 9090\n";

        let merged = toml_merge(existing, incoming, smart(&["database.password"]));

        let db = merged["database"].as_table().unwrap();
        assert_eq!(db["host"].as_str(), Some("db.new"));
        assert_eq!(db["password"].as_str(), Some("secret"));
        assert_eq!(db["pool"].as_integer(), Some(10));
        assert_eq!(merged["server"]["port"].as_integer(), Some(9090));
    }

    #[test]
    fn test_merge_smart_bare_key_matches_any_section() {
        let merged = toml_merge(
            "[a]\napi_key = 'mine'\n[b]\napi_key = 'also-mine'\n",
            "[a]\napi_key = 'x'\n[b]\napi_key = 'y'\n",
            smart(&["api_key"]),
        );
        assert_eq!(merged["a"]["api_key"].as_str(), Some("mine"));
        assert_eq!(merged["b"]["api_key"].as_str(), Some("also-mine"));
    }

    #[test]
    fn test_merge_smart_empty_keys_without_conflicts_matches_preserve_user() {
        let existing = "a = 1\n[s]\nx = true\n";
        let incoming = "b = 2\n[s]\ny = false\n";
        assert_eq!(
            toml_merge(existing, incoming, smart(&[])),
            toml_merge(existing, incoming, MergeStrategy::PreserveUser)
        );
    }

    #[test]
    fn test_section_override_refines_only_its_section() {
        let existing = "[server]\nport = 1\n[client]\nport = 1\n";
        let incoming = "[server]\nport = 2\n[client]\nport = 2\n";
        let section = SectionOverride {
            section: "server".to_string(),
            strategy: MergeStrategy::Replace,
        };

        let out = MergeEngine::new()
            .merge_text(ConfigFormat::Toml, existing, incoming, &MergeStrategy::PreserveUser, &[&section])
            .unwrap();
        let merged: toml::Table = out.parse().unwrap();

        assert_eq!(merged["server"]["port"].as_integer(), Some(2));
        assert_eq!(merged["client"]["port"].as_integer(), Some(1));
    }

    #[test]
    fn test_structural_conflict_keeps_existing() {
        let merged = toml_merge("[a]\nb = 1\n", "a = 'flat'\n", MergeStrategy::PreserveUser);
        assert_eq!(merged["a"]["b"].as_integer(), Some(1));

        let merged = toml_merge("a = 'flat'\n", "[a]\nb = 1\n", MergeStrategy::PreserveUser);
        assert_eq!(merged["a"].as_str(), Some("flat"));
    }

    #[test]
    fn test_json_merge() {
        let out = MergeEngine::new()
            .merge_text(
                ConfigFormat::Json,
                r#"{"theme": "dark", "features": {"beta": true}}"#,
                r#"{"theme": "light", "features": {"beta": false, "new": true}, "version": 2}"#,
                &MergeStrategy::PreserveUser,
                &[],
            )
            .unwrap();
        let merged: serde_json::Value = serde_json::from_str(&out).unwrap();

        assert_eq!(merged["theme"], "dark");
        assert_eq!(merged["features"]["beta"], true);
        assert_eq!(merged["features"]["new"], true);
        assert_eq!(merged["version"], 2);
    }

    #[test]
    fn test_parse_failure_is_merge_error() {
        let err = MergeEngine::new()
            .merge_text(ConfigFormat::Toml, "a = 1\n", "not toml [", &MergeStrategy::PreserveUser, &[])
            .unwrap_err();
        assert!(matches!(err, MergeError::Parse { side: "incoming", .. }));
    }

    #[test]
    fn test_merge_files_rejects_invalid_utf8() {
        let temp = tempfile::TempDir::new().unwrap();
        let existing = temp.path().join("settings.toml");
        let incoming = temp.path().join("incoming.toml");
        fs::write(&existing, b"password = \"s\xffcret\"\n").unwrap();
        fs::write(&incoming, "port = 1\n").unwrap();

        let err = MergeEngine::new()
            .merge_files(ConfigFormat::Toml, &existing, &incoming, &MergeStrategy::PreserveUser, &[])
            .unwrap_err();

        assert!(matches!(err, MergeError::Parse { side: "existing", .. }), "{:?}", err);
        assert_eq!(fs::read(&existing).unwrap(), b"password = \"s\xffcret\"\n");
    }

    #[test]
    fn test_merge_files_missing_existing_copies_incoming() {
        let temp = tempfile::TempDir::new().unwrap();
        let incoming = temp.path().join("incoming.toml");
        fs::write(&incoming, "# shipped\na = 1\n").unwrap();

        let out = MergeEngine::new()
            .merge_files(
                ConfigFormat::Toml,
                &temp.path().join("missing.toml"),
                &incoming,
                &MergeStrategy::PreserveUser,
                &[],
            )
            .unwrap();
        assert_eq!(out, b"# shipped\na = 1\n");
    }

    #[test]
    fn test_merge_files_whole_file_replace_is_verbatim() {
        let temp = tempfile::TempDir::new().unwrap();
        let existing = temp.path().join("existing.toml");
        let incoming = temp.path().join("incoming.toml");
        fs::write(&existing, "a = 1\n").unwrap();
        fs::write(&incoming, "# vendor comment\nb = 2\n").unwrap();

        let out = MergeEngine::new()
            .merge_files(ConfigFormat::Toml, &existing, &incoming, &MergeStrategy::Replace, &[])
            .unwrap();
        assert_eq!(out, b"# vendor comment\nb = 2\n");
    }
}
