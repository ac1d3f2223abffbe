// src/manifest/document.rs
//! YAML document shapes and their conversion into the typed model

use super::*;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeSet;

const DEFAULT_KEEP_DAYS: u32 = 30;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    version: Option<Value>,
    files: Option<IndexMap<String, RawFileRule>>,
    directories: Option<IndexMap<String, RawDirectoryRule>>,
    #[serde(default)]
    hooks: IndexMap<String, Option<Vec<RawCommand>>>,
    #[serde(default)]
    requirements: RawRequirements,
    #[serde(default)]
    rollback: RawRollback,
    #[serde(default)]
    post_update_tests: Vec<RawHealthCheck>,
    #[serde(default)]
    migrations: Mapping,
    #[serde(default)]
    notifications: RawNotifications,
    #[serde(default)]
    conditionals: Vec<RawConditional>,
    #[serde(default)]
    cleanup: RawCleanup,
    #[serde(default)]
    merge_strategies: IndexMap<String, RawSectionStrategies>,
    #[serde(default)]
    security: RawSecurity,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFileRule {
    action: Option<String>,
    merge_strategy: Option<String>,
    preserve_keys: Option<Vec<String>>,
    #[serde(default)]
    backup: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDirectoryRule {
    #[serde(default)]
    preserve: bool,
    #[serde(default)]
    cleanup_old: bool,
    keep_days: Option<u32>,
    backup: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Plain(String),
    Detailed { command: String, timeout: Option<f64> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRequirements {
    #[serde(default)]
    min_disk_space_mb: u64,
    #[serde(default)]
    required_commands: Vec<String>,
    #[serde(default)]
    required_services: Vec<String>,
    #[serde(default)]
    environment_checks: Vec<RawEnvironmentCheck>,
}

#[derive(Debug, Deserialize)]
struct RawEnvironmentCheck {
    name: Option<String>,
    command: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRollback {
    #[serde(default)]
    auto_rollback_on: Vec<String>,
    keep_backups: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawHealthCheck {
    name: Option<String>,
    command: String,
    timeout: Option<f64>,
    retry_count: Option<i64>,
    retry_delay: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNotifications {
    #[serde(default)]
    on_success: Vec<RawTarget>,
    #[serde(default)]
    on_failure: Vec<RawTarget>,
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
    level: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConditional {
    condition: String,
    action: String,
    message: Option<String>,
    #[serde(default)]
    manual_steps: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCleanup {
    #[serde(default)]
    remove_files: Vec<String>,
    #[serde(default)]
    remove_directories: Vec<String>,
    #[serde(default)]
    commands: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSectionStrategies {
    #[serde(default)]
    sections: IndexMap<String, RawSection>,
}

#[derive(Debug, Deserialize)]
struct RawSection {
    strategy: String,
    preserve_keys: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSecurity {
    #[serde(default)]
    allowed_file_types: Vec<String>,
    max_file_size_mb: Option<u64>,
    #[serde(default)]
    verify_checksums: bool,
}

pub(super) fn parse(content: &str) -> Result<Manifest, ManifestError> {
    let raw: RawManifest = serde_yaml::from_str(content)?;

    let version_text = raw
        .version
        .as_ref()
        .and_then(scalar_text)
        .ok_or_else(|| ManifestError::MissingField("version".to_string()))?;
    let version = AppVersion::parse(&version_text).map_err(|reason| ManifestError::InvalidVersion {
        field: "version".to_string(),
        reason,
    })?;

    let files = raw
        .files
        .ok_or_else(|| ManifestError::MissingField("files".to_string()))?
        .into_iter()
        .map(|(pattern, rule)| file_rule(&pattern, rule))
        .collect::<Result<Vec<_>, _>>()?;

    let directories = raw
        .directories
        .ok_or_else(|| ManifestError::MissingField("directories".to_string()))?
        .into_iter()
        .map(|(pattern, rule)| directory_rule(&pattern, rule))
        .collect::<Result<Vec<_>, _>>()?;

    let mut hooks = Hooks::default();
    for (phase, commands) in raw.hooks {
        let phase: HookPhase = phase
            .parse()
            .map_err(|_| ManifestError::UnknownHookPhase(phase.clone()))?;
        let commands = commands
            .unwrap_or_default()
            .into_iter()
            .map(|c| hook_command(phase, c))
            .collect::<Result<Vec<_>, _>>()?;
        hooks.insert(phase, commands);
    }

    Ok(Manifest {
        version,
        files,
        directories,
        hooks,
        requirements: requirements(raw.requirements),
        rollback: rollback_policy(raw.rollback)?,
        post_update_tests: raw
            .post_update_tests
            .into_iter()
            .enumerate()
            .map(|(idx, check)| health_check(idx, check))
            .collect::<Result<Vec<_>, _>>()?,
        migrations: migrations(raw.migrations)?,
        notifications: Notifications {
            on_success: targets(raw.notifications.on_success)?,
            on_failure: targets(raw.notifications.on_failure)?,
        },
        conditionals: raw
            .conditionals
            .into_iter()
            .map(conditional)
            .collect::<Result<Vec<_>, _>>()?,
        cleanup: CleanupTasks {
            remove_files: patterns(&raw.cleanup.remove_files)?,
            remove_directories: patterns(&raw.cleanup.remove_directories)?,
            commands: raw.cleanup.commands,
        },
        merge_strategies: raw
            .merge_strategies
            .into_iter()
            .map(|(pattern, entry)| section_strategies(&pattern, entry))
            .collect::<Result<Vec<_>, _>>()?,
        security: SecurityPolicy {
            allowed_file_types: raw.security.allowed_file_types,
            max_file_size_mb: raw.security.max_file_size_mb,
            verify_checksums: raw.security.verify_checksums,
        },
    })
}

/// YAML scalars written as numbers (`version: 2.1`) are taken as text
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn file_rule(pattern: &str, raw: RawFileRule) -> Result<FileRule, ManifestError> {
    let action_name = raw.action.as_deref().unwrap_or("replace");
    let format = match action_name {
        "merge_toml" => Some(ConfigFormat::Toml),
        "merge_json" => Some(ConfigFormat::Json),
        "replace" | "backup_replace" | "skip" => None,
        other => {
            return Err(ManifestError::UnknownAction {
                pattern: pattern.to_string(),
                action: other.to_string(),
            });
        }
    };

    let action = match format {
        Some(format) => {
            let strategy_name =
                raw.merge_strategy
                    .as_deref()
                    .ok_or_else(|| ManifestError::MissingMergeStrategy {
                        pattern: pattern.to_string(),
                        action: action_name.to_string(),
                    })?;
            FileAction::Merge {
                format,
                strategy: merge_strategy(pattern, strategy_name, raw.preserve_keys)?,
            }
        }
        None => {
            if raw.merge_strategy.is_some() || raw.preserve_keys.is_some() {
                return Err(ManifestError::Invalid(format!(
                    "files.'{}': merge_strategy and preserve_keys only apply to merge actions",
                    pattern
                )));
            }
            match action_name {
                "backup_replace" => FileAction::BackupReplace,
                "skip" => FileAction::Skip,
                _ => FileAction::Replace,
            }
        }
    };

    Ok(FileRule {
        pattern: RulePattern::new(pattern)?,
        action,
        backup: raw.backup,
    })
}

fn merge_strategy(
    context: &str,
    name: &str,
    preserve_keys: Option<Vec<String>>,
) -> Result<MergeStrategy, ManifestError> {
    let strategy = match name {
        "preserve_user" => MergeStrategy::PreserveUser,
        "update_only" => MergeStrategy::UpdateOnly,
        "replace" => MergeStrategy::Replace,
        "merge_smart" => {
            return Ok(MergeStrategy::MergeSmart {
                preserve_keys: preserve_keys.unwrap_or_default().into_iter().collect::<BTreeSet<_>>(),
            });
        }
        other => {
            return Err(ManifestError::UnknownStrategy {
                pattern: context.to_string(),
                strategy: other.to_string(),
            });
        }
    };

    if preserve_keys.is_some() {
        return Err(ManifestError::Invalid(format!(
            "'{}': preserve_keys requires merge_strategy merge_smart",
            context
        )));
    }
    Ok(strategy)
}

fn directory_rule(pattern: &str, raw: RawDirectoryRule) -> Result<DirectoryRule, ManifestError> {
    let backup = raw.backup.unwrap_or(true);
    if !backup && !raw.preserve {
        return Err(ManifestError::Invalid(format!(
            "directories.'{}': backup: false requires preserve: true",
            pattern
        )));
    }
    Ok(DirectoryRule {
        pattern: RulePattern::new(pattern)?,
        preserve: raw.preserve,
        cleanup_old: raw.cleanup_old,
        keep_days: raw.keep_days.unwrap_or(DEFAULT_KEEP_DAYS),
        backup,
    })
}

fn seconds(field: String, value: f64) -> Result<Duration, ManifestError> {
    if value < 0.0 || !value.is_finite() {
        return Err(ManifestError::NegativeValue { field, value });
    }
    Ok(Duration::from_secs_f64(value))
}

fn hook_command(phase: HookPhase, raw: RawCommand) -> Result<HookCommand, ManifestError> {
    Ok(match raw {
        RawCommand::Plain(command) => HookCommand {
            command,
            timeout: None,
        },
        RawCommand::Detailed { command, timeout } => HookCommand {
            timeout: timeout
                .map(|t| seconds(format!("hooks.{}.timeout", phase), t))
                .transpose()?,
            command,
        },
    })
}

fn requirements(raw: RawRequirements) -> Requirements {
    Requirements {
        min_disk_space_mb: raw.min_disk_space_mb,
        required_commands: raw.required_commands,
        required_services: raw.required_services,
        environment_checks: raw
            .environment_checks
            .into_iter()
            .map(|check| EnvironmentCheck {
                name: check.name.unwrap_or_else(|| check.command.clone()),
                command: check.command,
            })
            .collect(),
    }
}

fn rollback_policy(raw: RawRollback) -> Result<RollbackPolicy, ManifestError> {
    let auto_rollback_on = raw
        .auto_rollback_on
        .iter()
        .map(|trigger| match trigger.as_str() {
            "health_check_fail" => Ok(RollbackTrigger::HealthCheckFail),
            "service_start_fail" => Ok(RollbackTrigger::ServiceStartFail),
            other => Err(ManifestError::Invalid(format!(
                "unknown rollback trigger '{}'",
                other
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    if raw.keep_backups == Some(0) {
        return Err(ManifestError::Invalid(
            "rollback.keep_backups must be at least 1".to_string(),
        ));
    }

    Ok(RollbackPolicy {
        auto_rollback_on,
        keep_backups: raw.keep_backups,
    })
}

fn health_check(idx: usize, raw: RawHealthCheck) -> Result<HealthCheck, ManifestError> {
    let name = raw.name.unwrap_or_else(|| format!("check-{}", idx + 1));
    let field = |f: &str| format!("post_update_tests.{}.{}", name, f);

    let retry_count = match raw.retry_count {
        Some(n) if n < 0 => {
            return Err(ManifestError::NegativeValue {
                field: field("retry_count"),
                value: n as f64,
            });
        }
        Some(n) => u32::try_from(n)
            .map_err(|_| ManifestError::Invalid(format!("{} is too large", field("retry_count"))))?,
        None => 0,
    };

    Ok(HealthCheck {
        timeout: raw
            .timeout
            .map(|t| seconds(field("timeout"), t))
            .transpose()?
            .unwrap_or(HealthCheck::DEFAULT_TIMEOUT),
        retry_delay: raw
            .retry_delay
            .map(|d| seconds(field("retry_delay"), d))
            .transpose()?
            .unwrap_or(HealthCheck::DEFAULT_RETRY_DELAY),
        retry_count,
        command: raw.command,
        name,
    })
}

fn migrations(raw: Mapping) -> Result<Vec<Migration>, ManifestError> {
    let mut migrations = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        let text = scalar_text(&key)
            .ok_or_else(|| ManifestError::Invalid("migration keys must be versions".to_string()))?;
        let version = AppVersion::parse(&text).map_err(|reason| ManifestError::InvalidVersion {
            field: format!("migrations.{}", text),
            reason,
        })?;
        let commands = match serde_yaml::from_value::<OneOrMany>(value)? {
            OneOrMany::One(cmd) => vec![cmd],
            OneOrMany::Many(cmds) => cmds,
        };
        if migrations.iter().any(|m: &Migration| m.version == version) {
            return Err(ManifestError::Invalid(format!(
                "migration version {} is declared twice",
                text
            )));
        }
        migrations.push(Migration { version, commands });
    }
    migrations.sort_by(|a, b| a.version.cmp(&b.version));
    Ok(migrations)
}

fn targets(raw: Vec<RawTarget>) -> Result<Vec<NotificationTarget>, ManifestError> {
    raw.into_iter()
        .map(|target| {
            let kind = match target.kind.as_str() {
                "log" => TargetKind::Log,
                "webhook" => TargetKind::Webhook,
                "email" => TargetKind::Email,
                other => {
                    return Err(ManifestError::Invalid(format!(
                        "unknown notification type '{}'",
                        other
                    )));
                }
            };
            if kind == TargetKind::Webhook && target.url.is_none() {
                return Err(ManifestError::MissingField("notifications.webhook.url".to_string()));
            }
            Ok(NotificationTarget {
                kind,
                message: target.message,
                level: target.level,
                url: target.url,
            })
        })
        .collect()
}

fn conditional(raw: RawConditional) -> Result<Conditional, ManifestError> {
    let condition = Condition::parse(&raw.condition).map_err(|reason| ManifestError::InvalidCondition {
        condition: raw.condition.clone(),
        reason,
    })?;
    let action = match raw.action.as_str() {
        "continue" => ConditionalAction::Continue,
        "warn" => ConditionalAction::Warn,
        "skip_update" => ConditionalAction::SkipUpdate,
        "require_manual_intervention" => ConditionalAction::RequireManualIntervention,
        other => {
            return Err(ManifestError::Invalid(format!(
                "unknown conditional action '{}'",
                other
            )));
        }
    };
    Ok(Conditional {
        condition,
        action,
        message: raw.message,
        manual_steps: raw.manual_steps,
    })
}

fn patterns(raw: &[String]) -> Result<Vec<RulePattern>, ManifestError> {
    raw.iter().map(|p| RulePattern::new(p)).collect()
}

fn section_strategies(pattern: &str, raw: RawSectionStrategies) -> Result<SectionStrategies, ManifestError> {
    let sections = raw
        .sections
        .into_iter()
        .map(|(section, entry)| {
            let context = format!("merge_strategies.'{}'.sections.{}", pattern, section);
            Ok(SectionOverride {
                strategy: merge_strategy(&context, &entry.strategy, entry.preserve_keys)?,
                section,
            })
        })
        .collect::<Result<Vec<_>, ManifestError>>()?;

    Ok(SectionStrategies {
        pattern: RulePattern::new(pattern)?,
        sections,
    })
}
