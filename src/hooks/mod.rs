// src/hooks/mod.rs

//! Lifecycle hooks and version migrations
//!
//! A phase's commands run one after another in declaration order. The first
//! command that exits non-zero or times out aborts the rest of the phase and
//! is reported as a [`HookError`]. Migrations follow the same contract, one
//! version at a time in ascending order.
//!
//! Every command sees these variables on top of the engine's environment:
//!
//! | Variable | Value |
//! |----------|-------|
//! | `SHIP_PHASE` | `pre_update`, `post_update`, `rollback` or `migration` |
//! | `SHIP_APP_DIR` | live application directory |
//! | `SHIP_VERSION` | version being installed |
//! | `SHIP_PREVIOUS_VERSION` | version being replaced, if known |
//!
//! Migrations additionally get `MIGRATION_VERSION` and `APP_DIR`.

mod command;

pub use command::{CommandOutcome, ExternalCommand, SHELL};

use crate::manifest::{HookCommand, Migration};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Default per-command timeout for hooks and migrations
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Lifecycle phase a hook list belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookPhase {
    PreUpdate,
    PostUpdate,
    Rollback,
}

impl HookPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreUpdate => "pre_update",
            Self::PostUpdate => "post_update",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre_update" => Ok(Self::PreUpdate),
            "post_update" => Ok(Self::PostUpdate),
            "rollback" => Ok(Self::Rollback),
            other => Err(format!("unknown hook phase '{}'", other)),
        }
    }
}

#[derive(Error, Debug)]
pub enum HookError {
    #[error("{phase} command `{command}` exited with {}", .code.map(|c| c.to_string()).unwrap_or_else(|| "a signal".to_string()))]
    Failed {
        phase: String,
        command: String,
        code: Option<i32>,
    },

    #[error("{phase} command `{command}` timed out after {timeout:?}")]
    TimedOut {
        phase: String,
        command: String,
        timeout: Duration,
    },

    #[error("Failed to spawn {phase} command `{command}`: {source}")]
    Spawn {
        phase: String,
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl HookError {
    /// The command that failed
    pub fn command(&self) -> &str {
        match self {
            Self::Failed { command, .. } | Self::TimedOut { command, .. } | Self::Spawn { command, .. } => {
                command
            }
        }
    }
}

/// Versions exported to hook commands
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub version: String,
    pub previous_version: Option<String>,
}

/// Runs hook phases and migrations against one application directory
#[derive(Debug, Clone)]
pub struct HookExecutor {
    app_dir: PathBuf,
    hook_timeout: Duration,
    migration_timeout: Duration,
}

impl HookExecutor {
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
            hook_timeout: DEFAULT_TIMEOUT,
            migration_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Default timeout for hook commands without their own
    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn with_migration_timeout(mut self, timeout: Duration) -> Self {
        self.migration_timeout = timeout;
        self
    }

    pub fn app_dir(&self) -> &Path {
        &self.app_dir
    }

    /// Run every command of `phase`, stopping at the first failure
    pub fn run_phase(&self, phase: HookPhase, commands: &[HookCommand], ctx: &HookContext) -> Result<(), HookError> {
        if commands.is_empty() {
            return Ok(());
        }
        info!("Running {} {} hook(s)", commands.len(), phase);

        for hook in commands {
            let timeout = hook.timeout.unwrap_or(self.hook_timeout);
            let cmd = self.base_command(&hook.command, timeout, phase.as_str(), ctx);
            self.execute(phase.as_str(), &hook.command, cmd)?;
        }
        Ok(())
    }

    /// Run every command of `phase`, logging failures instead of stopping
    ///
    /// Used for rollback hooks, where an earlier failure must not keep the
    /// remaining recovery steps from running.
    pub fn run_phase_best_effort(
        &self,
        phase: HookPhase,
        commands: &[HookCommand],
        ctx: &HookContext,
    ) -> Vec<HookError> {
        let mut failures = Vec::new();
        for hook in commands {
            let timeout = hook.timeout.unwrap_or(self.hook_timeout);
            let cmd = self.base_command(&hook.command, timeout, phase.as_str(), ctx);
            if let Err(e) = self.execute(phase.as_str(), &hook.command, cmd) {
                error!("{}", e);
                failures.push(e);
            }
        }
        failures
    }

    /// Run migrations in the given (ascending) order
    pub fn run_migrations(&self, migrations: &[&Migration], ctx: &HookContext) -> Result<(), HookError> {
        for migration in migrations {
            info!("Running migration for version {}", migration.version);
            for script in &migration.commands {
                let cmd = self
                    .base_command(script, self.migration_timeout, "migration", ctx)
                    .env("MIGRATION_VERSION", migration.version.as_str())
                    .env("APP_DIR", self.app_dir.to_string_lossy());
                self.execute("migration", script, cmd)?;
            }
        }
        Ok(())
    }

    fn base_command(&self, script: &str, timeout: Duration, phase: &str, ctx: &HookContext) -> ExternalCommand {
        let mut cmd = ExternalCommand::shell(script, timeout)
            .env("SHIP_PHASE", phase)
            .env("SHIP_APP_DIR", self.app_dir.to_string_lossy())
            .env("SHIP_VERSION", ctx.version.as_str());
        if let Some(previous) = &ctx.previous_version {
            cmd = cmd.env("SHIP_PREVIOUS_VERSION", previous.as_str());
        }
        // Hooks may run while the app directory is swapped out
        if self.app_dir.is_dir() {
            cmd = cmd.current_dir(&self.app_dir);
        }
        cmd
    }

    fn execute(&self, phase: &str, script: &str, cmd: ExternalCommand) -> Result<(), HookError> {
        info!("[{}] $ {}", phase, script);
        let outcome = cmd.run().map_err(|source| HookError::Spawn {
            phase: phase.to_string(),
            command: script.to_string(),
            source,
        })?;
        outcome.relay(phase);

        if outcome.timed_out() {
            warn!("[{}] killed after {:?}", phase, cmd.timeout);
            return Err(HookError::TimedOut {
                phase: phase.to_string(),
                command: script.to_string(),
                timeout: cmd.timeout,
            });
        }
        if !outcome.success() {
            return Err(HookError::Failed {
                phase: phase.to_string(),
                command: script.to_string(),
                code: outcome.code(),
            });
        }
        Ok(())
    }
}
