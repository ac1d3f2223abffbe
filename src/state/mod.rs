// src/state/mod.rs

//! Persisted run state
//!
//! One JSON record describes the last run that reached a terminal state:
//!
//! ```json
//! { "last_run": "2026-10-18T03:00:12Z", "last_version": "2.1.0", "last_result": "success" }
//! ```
//!
//! The record is replaced with a temp file and a rename, so readers see the
//! old or the new record and never a torn one.

use crate::error::{Error, Result};
use crate::filesystem::write_atomic;
use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Terminal result recorded for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    Success,
    RolledBack,
    Failed,
}

impl RunResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub last_run: DateTime<Utc>,
    pub last_version: String,
    pub last_result: RunResult,
}

/// Scheduling period for the once-per-period gate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Hourly,
    #[default]
    Daily,
    Weekly,
}

impl Period {
    /// Whether two local instants fall in the same period
    pub fn same_period(&self, a: DateTime<Local>, b: DateTime<Local>) -> bool {
        match self {
            Self::Hourly => a.date_naive() == b.date_naive() && a.hour() == b.hour(),
            Self::Daily => a.date_naive() == b.date_naive(),
            Self::Weekly => a.iso_week() == b.iso_week(),
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            other => Err(format!("unknown period '{}' (expected hourly, daily or weekly)", other)),
        }
    }
}

pub struct StateStore {
    path: PathBuf,
    period: Period,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, period: Period) -> Self {
        Self {
            path: path.into(),
            period,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last record
    ///
    /// A missing file is a first run. An unreadable record is logged and
    /// treated the same way, so a damaged file cannot wedge the updater.
    pub fn load(&self) -> Result<Option<ExecutionState>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::State(format!("cannot read {}: {}", self.path.display(), e))),
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!("Ignoring unreadable state file {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    /// Period gate against the current local time
    pub fn should_run(&self, force: bool) -> Result<bool> {
        self.should_run_at(force, Local::now())
    }

    pub fn should_run_at(&self, force: bool, now: DateTime<Local>) -> Result<bool> {
        if force {
            debug!("Forced run, skipping period gate");
            return Ok(true);
        }
        let Some(state) = self.load()? else {
            return Ok(true);
        };
        let last = state.last_run.with_timezone(&Local);
        if self.period.same_period(last, now) {
            info!(
                "Already ran this {:?} period at {} ({} {})",
                self.period, last, state.last_version, state.last_result
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Whether `version` is already installed by a successful run
    pub fn already_applied(&self, version: &str) -> Result<bool> {
        Ok(self
            .load()?
            .is_some_and(|s| s.last_result == RunResult::Success && s.last_version == version))
    }

    /// Record a terminal result
    pub fn commit(&self, version: &str, result: RunResult) -> Result<ExecutionState> {
        self.commit_at(version, result, Utc::now())
    }

    pub fn commit_at(&self, version: &str, result: RunResult, at: DateTime<Utc>) -> Result<ExecutionState> {
        let state = ExecutionState {
            last_run: at,
            last_version: version.to_string(),
            last_result: result,
        };
        let mut json = serde_json::to_vec_pretty(&state).map_err(|e| Error::State(e.to_string()))?;
        json.push(b'\n');
        write_atomic(&self.path, &json)
            .map_err(|e| Error::State(format!("cannot write {}: {}", self.path.display(), e)))?;
        info!("Recorded {} for version {}", result, version);
        Ok(state)
    }
}
