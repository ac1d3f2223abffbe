// src/error.rs

use crate::hooks::HookError;
use crate::manifest::ManifestError;
use crate::merge::MergeError;
use std::path::PathBuf;
use thiserror::Error;

/// Core error types for Ship
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or contradictory manifest (fatal, pre-run)
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// One or more unmet requirements (fatal, pre-backup)
    #[error("Prerequisites not met: {}", .0.join("; "))]
    Prerequisite(Vec<String>),

    /// Snapshot could not be created (fatal, pre-mutation)
    #[error("Backup failed: {0}")]
    Backup(String),

    /// A planned file action failed
    #[error("Failed to apply {path}: {reason}")]
    Apply { path: PathBuf, reason: String },

    /// Structured merge failed for one file
    #[error("Merge failed: {0}")]
    Merge(#[from] MergeError),

    /// Hook or migration command failed
    #[error("Hook failed: {0}")]
    Hook(#[from] HookError),

    /// Post-update checks failed after retries
    #[error("Health checks failed: {}", .0.join(", "))]
    HealthCheck(Vec<String>),

    /// Restoration itself failed; the application may be in an indeterminate state
    #[error("ROLLBACK FAILED, operator intervention required: {0}")]
    Rollback(String),

    /// Persisted run state could not be read or written
    #[error("State error: {0}")]
    State(String),

    /// Engine configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another run holds the lock
    #[error("Another update is running (lock held by pid {pid:?})")]
    Busy { pid: Option<u32> },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Path escapes its root
    #[error("Path traversal rejected: {0}")]
    PathTraversal(String),

    /// Path is empty or otherwise unusable
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl Error {
    /// Stable kind name used in logs and notification events
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Manifest(_) => "manifest_error",
            Self::Prerequisite(_) => "prerequisite_error",
            Self::Backup(_) => "backup_error",
            Self::Apply { .. } => "apply_error",
            Self::Merge(_) => "merge_error",
            Self::Hook(_) => "hook_error",
            Self::HealthCheck(_) => "health_check_failure",
            Self::Rollback(_) => "rollback_error",
            Self::State(_) => "state_error",
            Self::Config(_) => "config_error",
            Self::Busy { .. } => "busy",
            Self::Io(_) => "io_error",
            Self::PathTraversal(_) => "path_traversal",
            Self::InvalidPath(_) => "invalid_path",
        }
    }

    pub(crate) fn apply(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Apply {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias using Ship's Error type
pub type Result<T> = std::result::Result<T, Error>;
