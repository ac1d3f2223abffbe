// src/manifest/mod.rs
//! Update manifest (update-manifest.yaml) model and loader
//!
//! A manifest ships inside every staged release and describes how each of
//! its files is applied, which directories are left alone, and which
//! commands run around the update. Loading is pure: the document is parsed,
//! converted into the typed model below and validated as a whole before any
//! pipeline phase looks at it.

mod document;
pub mod pattern;
mod validate;

pub use pattern::{RulePattern, Specificity};

use crate::conditionals::Condition;
use crate::hooks::HookPhase;
use crate::merge::{ConfigFormat, MergeStrategy};
use crate::version::AppVersion;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default manifest file name inside a staged release
pub const MANIFEST_FILE: &str = "update-manifest.yaml";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read manifest file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse manifest: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Unknown action '{action}' for files.'{pattern}'")]
    UnknownAction { pattern: String, action: String },

    #[error("Unknown merge strategy '{strategy}' for '{pattern}'")]
    UnknownStrategy { pattern: String, strategy: String },

    #[error("files.'{pattern}': action {action} requires merge_strategy")]
    MissingMergeStrategy { pattern: String, action: String },

    #[error("Invalid glob '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },

    #[error("Unknown hook phase '{0}' (expected pre_update, post_update or rollback)")]
    UnknownHookPhase(String),

    #[error("{field} must not be negative (got {value})")]
    NegativeValue { field: String, value: f64 },

    #[error("Rules '{first}' and '{second}' overlap with equal specificity but different actions")]
    ConflictingRules { first: String, second: String },

    #[error("Invalid version in {field}: {reason}")]
    InvalidVersion { field: String, reason: String },

    #[error("Invalid condition '{condition}': {reason}")]
    InvalidCondition { condition: String, reason: String },

    #[error("Invalid manifest: {0}")]
    Invalid(String),
}

/// What to do with one staged file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAction {
    /// Overwrite with the incoming file
    Replace,
    /// Overwrite, keeping the previous content as `<file>.backup`
    BackupReplace,
    /// Leave the installed file untouched
    Skip,
    /// Structured merge of installed and incoming content
    Merge {
        format: ConfigFormat,
        strategy: MergeStrategy,
    },
}

impl FileAction {
    /// Manifest spelling of the action
    pub fn name(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::BackupReplace => "backup_replace",
            Self::Skip => "skip",
            Self::Merge {
                format: ConfigFormat::Toml,
                ..
            } => "merge_toml",
            Self::Merge {
                format: ConfigFormat::Json,
                ..
            } => "merge_json",
        }
    }
}

/// A `files:` entry
#[derive(Debug, Clone)]
pub struct FileRule {
    pub pattern: RulePattern,
    pub action: FileAction,
    /// Keep a `<file>.backup` copy before overwriting
    pub backup: bool,
}

/// A `directories:` entry
#[derive(Debug, Clone)]
pub struct DirectoryRule {
    pub pattern: RulePattern,
    /// Nothing inside is ever written by a file rule
    pub preserve: bool,
    /// Prune files older than `keep_days` after a committed update
    pub cleanup_old: bool,
    pub keep_days: u32,
    /// Included in snapshots; only a preserved directory may opt out
    pub backup: bool,
}

impl DirectoryRule {
    /// Whether `key` lies strictly inside a directory this rule matches
    pub fn contains(&self, key: &str) -> bool {
        key.match_indices('/')
            .any(|(idx, _)| self.pattern.matches(&key[..idx]))
    }
}

/// One command in a hook phase
#[derive(Debug, Clone, PartialEq)]
pub struct HookCommand {
    pub command: String,
    /// Overrides the configured per-command default
    pub timeout: Option<Duration>,
}

/// Hook commands keyed by phase, in declaration order
#[derive(Debug, Clone, Default)]
pub struct Hooks {
    phases: BTreeMap<HookPhase, Vec<HookCommand>>,
}

impl Hooks {
    pub fn commands(&self, phase: HookPhase) -> &[HookCommand] {
        self.phases.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn insert(&mut self, phase: HookPhase, commands: Vec<HookCommand>) {
        self.phases.insert(phase, commands);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentCheck {
    pub name: String,
    pub command: String,
}

#[derive(Debug, Clone, Default)]
pub struct Requirements {
    pub min_disk_space_mb: u64,
    pub required_commands: Vec<String>,
    pub required_services: Vec<String>,
    pub environment_checks: Vec<EnvironmentCheck>,
}

/// Failures that roll an update back automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RollbackTrigger {
    HealthCheckFail,
    ServiceStartFail,
}

#[derive(Debug, Clone, Default)]
pub struct RollbackPolicy {
    pub auto_rollback_on: Vec<RollbackTrigger>,
    /// Overrides `general.keep_backups` from the engine config
    pub keep_backups: Option<usize>,
}

impl RollbackPolicy {
    pub fn triggers_on(&self, trigger: RollbackTrigger) -> bool {
        self.auto_rollback_on.contains(&trigger)
    }
}

/// A post-update verification command
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheck {
    pub name: String,
    pub command: String,
    pub timeout: Duration,
    /// Additional attempts after the first failure
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl HealthCheck {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

    /// Longest time this check can block the pipeline
    pub fn worst_case(&self) -> Duration {
        self.timeout * (self.retry_count + 1) + self.retry_delay * self.retry_count
    }
}

/// Commands run when upgrading past `version`
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: AppVersion,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Log,
    Webhook,
    Email,
}

#[derive(Debug, Clone)]
pub struct NotificationTarget {
    pub kind: TargetKind,
    /// Template over {version}, {error}, {timestamp}, {system_id}, {phase}, {outcome}
    pub message: String,
    pub level: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Notifications {
    pub on_success: Vec<NotificationTarget>,
    pub on_failure: Vec<NotificationTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalAction {
    Continue,
    Warn,
    SkipUpdate,
    RequireManualIntervention,
}

#[derive(Debug, Clone)]
pub struct Conditional {
    pub condition: Condition,
    pub action: ConditionalAction,
    pub message: Option<String>,
    pub manual_steps: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupTasks {
    pub remove_files: Vec<RulePattern>,
    pub remove_directories: Vec<RulePattern>,
    pub commands: Vec<String>,
}

impl CleanupTasks {
    pub fn is_empty(&self) -> bool {
        self.remove_files.is_empty() && self.remove_directories.is_empty() && self.commands.is_empty()
    }
}

/// Strategy refinement for keys under one section of a merged file
#[derive(Debug, Clone)]
pub struct SectionOverride {
    /// Dotted key prefix, e.g. `server` or `database.pool`
    pub section: String,
    pub strategy: MergeStrategy,
}

/// `merge_strategies:` entry for files matching `pattern`
#[derive(Debug, Clone)]
pub struct SectionStrategies {
    pub pattern: RulePattern,
    pub sections: Vec<SectionOverride>,
}

#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    /// Extensions such as `.py`; empty allows everything
    pub allowed_file_types: Vec<String>,
    pub max_file_size_mb: Option<u64>,
    /// Require the fetcher's verified-integrity flag
    pub verify_checksums: bool,
}

/// A validated update manifest
#[derive(Debug, Clone)]
pub struct Manifest {
    pub version: AppVersion,
    pub files: Vec<FileRule>,
    pub directories: Vec<DirectoryRule>,
    pub hooks: Hooks,
    pub requirements: Requirements,
    pub rollback: RollbackPolicy,
    pub post_update_tests: Vec<HealthCheck>,
    /// Sorted ascending by version
    pub migrations: Vec<Migration>,
    pub notifications: Notifications,
    pub conditionals: Vec<Conditional>,
    pub cleanup: CleanupTasks,
    pub merge_strategies: Vec<SectionStrategies>,
    pub security: SecurityPolicy,
}

impl Manifest {
    /// Load manifest from a file path
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate manifest text
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let manifest = document::parse(content)?;
        validate::validate(&manifest)?;
        Ok(manifest)
    }

    /// Section overrides for a merged file, longest section first
    pub fn section_overrides(&self, key: &str) -> Vec<&SectionOverride> {
        let mut overrides: Vec<&SectionOverride> = self
            .merge_strategies
            .iter()
            .filter(|entry| entry.pattern.matches(key))
            .flat_map(|entry| entry.sections.iter())
            .collect();
        overrides.sort_by(|a, b| b.section.len().cmp(&a.section.len()));
        overrides
    }

    /// Migrations in `(from, to]`, ascending
    pub fn migrations_between(&self, from: &AppVersion, to: &AppVersion) -> Vec<&Migration> {
        self.migrations
            .iter()
            .filter(|m| m.version.in_upgrade_range(from, to))
            .collect()
    }

    /// Worst-case total time spent in post-update checks
    pub fn health_check_budget(&self) -> Duration {
        self.post_update_tests.iter().map(HealthCheck::worst_case).sum()
    }
}
