// src/manifest/validate.rs
//! Whole-manifest checks that need more than one rule at a time

use super::{DirectoryRule, FileRule, Manifest, ManifestError};
use tracing::debug;

pub(super) fn validate(manifest: &Manifest) -> Result<(), ManifestError> {
    check_rule_conflicts(&manifest.files, &manifest.directories)?;

    for check in &manifest.post_update_tests {
        if check.command.trim().is_empty() {
            return Err(ManifestError::MissingField(format!(
                "post_update_tests.{}.command",
                check.name
            )));
        }
    }

    for ext in &manifest.security.allowed_file_types {
        if !ext.starts_with('.') {
            return Err(ManifestError::Invalid(format!(
                "security.allowed_file_types entry '{}' must start with '.'",
                ext
            )));
        }
    }

    Ok(())
}

/// Reject pairs of file rules the resolver could not order
///
/// Two rules conflict when they rank equally, can match the same path and
/// would do different things with it. Pairs whose patterns both sit inside
/// a preserved directory never reach the resolver and are exempt.
fn check_rule_conflicts(files: &[FileRule], directories: &[DirectoryRule]) -> Result<(), ManifestError> {
    for (i, first) in files.iter().enumerate() {
        for second in &files[i + 1..] {
            if first.pattern.specificity() != second.pattern.specificity() {
                continue;
            }
            if first.action == second.action && first.backup == second.backup {
                continue;
            }
            if !first.pattern.overlaps(&second.pattern) {
                continue;
            }
            if confined_to_preserved(first, directories) && confined_to_preserved(second, directories) {
                debug!(
                    "Rules '{}' and '{}' overlap only inside a preserved directory",
                    first.pattern, second.pattern
                );
                continue;
            }
            return Err(ManifestError::ConflictingRules {
                first: first.pattern.to_string(),
                second: second.pattern.to_string(),
            });
        }
    }
    Ok(())
}

fn confined_to_preserved(rule: &FileRule, directories: &[DirectoryRule]) -> bool {
    rule.pattern.literal_dir_prefixes().iter().any(|prefix| {
        directories
            .iter()
            .any(|dir| dir.preserve && dir.pattern.matches(prefix))
    })
}

#[cfg(test)]
mod tests {
    use crate::manifest::{Manifest, ManifestError};

    fn manifest(files: &str, directories: &str) -> Result<Manifest, ManifestError> {
        Manifest::parse(&format!(
            "version: '1.0.0'\nfiles:\n{}\ndirectories:\n{}\n",
            files, directories
        ))
    }

    #[test]
    fn test_equal_rank_overlap_with_different_actions_rejected() {
        let err = manifest(
            "  'a*':\n    action: replace\n  '*a':\n    action: skip",
            "  {}",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::ConflictingRules { .. }));
    }

    #[test]
    fn test_equal_rank_overlap_with_same_action_allowed() {
        assert!(manifest("  'a*':\n    action: skip\n  '*a':\n    action: skip", "  {}").is_ok());
    }

    #[test]
    fn test_disjoint_patterns_allowed() {
        assert!(manifest("  '*.toml':\n    action: skip\n  '*.json':\n    action: replace", "  {}").is_ok());
    }

    #[test]
    fn test_different_rank_is_not_a_conflict() {
        assert!(manifest("  '*.py':\n    action: replace\n  'app.py':\n    action: skip", "  {}").is_ok());
    }

    #[test]
    fn test_conflict_inside_preserved_directory_exempt() {
        let files = "  'data/a*':\n    action: replace\n  'data/*a':\n    action: skip";
        assert!(manifest(files, "  data:\n    preserve: true").is_ok());
        assert!(manifest(files, "  data:\n    preserve: false").is_err());
    }

    #[test]
    fn test_unknown_action_rejected() {
        let err = manifest("  '*.py':\n    action: explode", "  {}").unwrap_err();
        assert!(matches!(err, ManifestError::UnknownAction { .. }));
    }

    #[test]
    fn test_merge_without_strategy_rejected() {
        let err = manifest("  '*.toml':\n    action: merge_toml", "  {}").unwrap_err();
        assert!(matches!(err, ManifestError::MissingMergeStrategy { .. }));
    }

    #[test]
    fn test_preserve_keys_require_merge_smart() {
        let files = "  '*.toml':\n    action: merge_toml\n    merge_strategy: preserve_user\n    preserve_keys: [a]";
        assert!(manifest(files, "  {}").is_err());
    }

    #[test]
    fn test_bad_glob_rejected() {
        let err = manifest("  '[abc':\n    action: skip", "  {}").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidGlob { .. }));
    }

    #[test]
    fn test_unknown_hook_phase_rejected() {
        let err = Manifest::parse("version: '1'\nfiles: {}\ndirectories: {}\nhooks:\n  mid_update: ['echo hi']\n")
            .unwrap_err();
        assert!(matches!(err, ManifestError::UnknownHookPhase(_)));
    }

    #[test]
    fn test_negative_values_rejected() {
        let err = Manifest::parse(
            "version: '1'\nfiles: {}\ndirectories: {}\npost_update_tests:\n  - name: x\n    command: 'true'\n    retry_count: -1\n",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::NegativeValue { .. }));

        let err = Manifest::parse(
            "version: '1'\nfiles: {}\ndirectories: {}\nhooks:\n  post_update:\n    - command: 'true'\n      timeout: -5\n",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::NegativeValue { .. }));
    }

    #[test]
    fn test_required_keys() {
        assert!(matches!(
            Manifest::parse("files: {}\ndirectories: {}\n").unwrap_err(),
            ManifestError::MissingField(_)
        ));
        assert!(matches!(
            Manifest::parse("version: '1'\nfiles: {}\n").unwrap_err(),
            ManifestError::MissingField(_)
        ));
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        let err = Manifest::parse("version: '1'\nfiles: {}\ndirectories: {}\nrollout:\n  strategy: staged\n")
            .unwrap_err();
        assert!(matches!(err, ManifestError::ParseError(_)));
    }

    #[test]
    fn test_backup_false_requires_preserve() {
        assert!(manifest("  {}", "  cache:\n    backup: false").is_err());
        assert!(manifest("  {}", "  cache:\n    preserve: true\n    backup: false").is_ok());
    }

    #[test]
    fn test_invalid_condition_rejected() {
        let err = Manifest::parse(
            "version: '1'\nfiles: {}\ndirectories: {}\nconditionals:\n  - condition: \"moon_phase() == 'full'\"\n    action: skip_update\n",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidCondition { .. }));
    }
}
