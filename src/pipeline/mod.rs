// src/pipeline/mod.rs

//! Update pipeline: one state machine per invocation
//!
//! # Run Lifecycle
//!
//! ```text
//! CHECKING -> PREREQUISITE -> BACKUP -> APPLYING -> MIGRATING -> RESTARTING -> HEALTHCHECK -> COMMITTED
//!    |             |            |          |            |             |             |
//!    |             |            |          +------------+-------------+-------------+--> ROLLING_BACK -> ROLLED_BACK
//!    |             |            +--> FAILED (rollback hooks only, tree untouched)
//!    |             +--> FAILED (nothing to roll back)
//!    +--> no-op / SKIPPED / BLOCKED
//! ```
//!
//! The run lock is held from CHECKING to the terminal state. Every terminal
//! state that got past the gates is recorded in the state file and sent to
//! the notification dispatcher.

mod apply;
mod recovery;
mod rollback;

pub use apply::{ApplyReport, ApplyStep, BACKUP_SUFFIX};
pub use recovery::{RecoveryOutcome, recover_interrupted_swap};
pub use rollback::{RollbackController, RollbackReport};

use crate::backup::{Backup, BackupManager, SnapshotRequest};
use crate::cleanup::CleanupRunner;
use crate::conditionals::{self, ConditionContext, Gate};
use crate::config::ShipConfig;
use crate::error::{Error, Result};
use crate::health::HealthChecker;
use crate::hooks::{HookContext, HookExecutor, HookPhase};
use crate::lock::PipelineLock;
use crate::manifest::RollbackTrigger;
use crate::notify::{self, LogDispatcher, NotificationDispatcher, RunEvent};
use crate::release::{StagedRelease, read_version_file};
use crate::requirements::{PrerequisiteChecker, PrerequisiteReport};
use crate::resolver::{ActionPlan, RuleResolver};
use crate::state::{Period, RunResult, StateStore};
use crate::version::AppVersion;
use chrono::Utc;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Checking,
    Prerequisite,
    Backup,
    Applying,
    Migrating,
    Restarting,
    Healthcheck,
    Committed,
    RollingBack,
    RolledBack,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checking => "CHECKING",
            Self::Prerequisite => "PREREQUISITE",
            Self::Backup => "BACKUP",
            Self::Applying => "APPLYING",
            Self::Migrating => "MIGRATING",
            Self::Restarting => "RESTARTING",
            Self::Healthcheck => "HEALTHCHECK",
            Self::Committed => "COMMITTED",
            Self::RollingBack => "ROLLING_BACK",
            Self::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one invocation
#[derive(Debug)]
pub enum RunOutcome {
    Committed { version: String },
    /// Health checks failed and policy left the update in place
    CommittedUnhealthy { version: String, failed_checks: Vec<String> },
    /// Period or version gate; nothing to do
    NoOp { reason: String },
    /// A `skip_update` conditional matched
    Skipped { reason: String },
    /// A `require_manual_intervention` conditional matched
    Blocked { reason: String, manual_steps: Vec<String> },
    /// Another run holds the lock
    Busy { pid: Option<u32> },
    /// Failed before the application tree was touched
    Failed { state: RunState, error: Error },
    RolledBack { state: RunState, error: Error },
    /// Restore failed; the application may be in an indeterminate state
    RollbackFailed { state: RunState, error: Error, rollback_error: Error },
    /// Manual rollback to a named backup
    Restored { backup_id: String },
}

impl RunOutcome {
    /// Process exit code: 0 success or no-op, 1 error, 2 rolled back, 3 busy
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Committed { .. } | Self::NoOp { .. } | Self::Skipped { .. } | Self::Restored { .. } => 0,
            Self::CommittedUnhealthy { .. } | Self::Blocked { .. } | Self::Failed { .. } | Self::RollbackFailed { .. } => 1,
            Self::RolledBack { .. } => 2,
            Self::Busy { .. } => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Committed { .. } => "committed",
            Self::CommittedUnhealthy { .. } => "committed_unhealthy",
            Self::NoOp { .. } => "no_op",
            Self::Skipped { .. } => "skipped",
            Self::Blocked { .. } => "blocked",
            Self::Busy { .. } => "busy",
            Self::Failed { .. } => "failed",
            Self::RolledBack { .. } => "rolled_back",
            Self::RollbackFailed { .. } => "rollback_failed",
            Self::Restored { .. } => "restored",
        }
    }

    /// The error that ended the run, if any
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Failed { error, .. } | Self::RolledBack { error, .. } | Self::RollbackFailed { error, .. } => {
                Some(error)
            }
            _ => None,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed { version } => write!(f, "updated to {}", version),
            Self::CommittedUnhealthy { version, failed_checks } => write!(
                f,
                "updated to {} but health checks failed: {}",
                version,
                failed_checks.join(", ")
            ),
            Self::NoOp { reason } => write!(f, "nothing to do: {}", reason),
            Self::Skipped { reason } => write!(f, "update skipped: {}", reason),
            Self::Blocked { reason, manual_steps } => {
                write!(f, "manual intervention required: {}", reason)?;
                for step in manual_steps {
                    write!(f, "\n  - {}", step)?;
                }
                Ok(())
            }
            Self::Busy { pid: Some(pid) } => write!(f, "another update is running (pid {})", pid),
            Self::Busy { pid: None } => write!(f, "another update is running"),
            Self::Failed { state, error } => write!(f, "failed in {} [{}]: {}", state, error.kind(), error),
            Self::RolledBack { state, error } => {
                write!(f, "rolled back after {} [{}]: {}", state, error.kind(), error)
            }
            Self::RollbackFailed { state, error, rollback_error } => write!(
                f,
                "failed in {} [{}]: {}; {}",
                state,
                error.kind(),
                error,
                rollback_error
            ),
            Self::Restored { backup_id } => write!(f, "restored backup {}", backup_id),
        }
    }
}

/// Paths and policy for one application
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub app_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
    pub period: Period,
    pub keep_backups: usize,
    pub hook_timeout: Duration,
    pub migration_timeout: Duration,
    /// Bypass the period and version gates
    pub force: bool,
}

impl PipelineSettings {
    /// Settings keeping backups, state and lock under `work_dir`
    pub fn with_work_dir(app_dir: impl Into<PathBuf>, work_dir: &Path) -> Self {
        Self {
            app_dir: app_dir.into(),
            backup_dir: work_dir.join("backups"),
            state_file: work_dir.join("state.json"),
            lock_file: work_dir.join("ship.lock"),
            period: Period::Daily,
            keep_backups: 5,
            hook_timeout: crate::hooks::DEFAULT_TIMEOUT,
            migration_timeout: crate::hooks::DEFAULT_TIMEOUT,
            force: false,
        }
    }
}

impl From<&ShipConfig> for PipelineSettings {
    fn from(config: &ShipConfig) -> Self {
        let general = &config.general;
        Self {
            app_dir: general.app_dir.clone(),
            backup_dir: general.backup_dir.clone(),
            state_file: general.state_file.clone(),
            lock_file: general.lock_file.clone(),
            period: general.period,
            keep_backups: general.keep_backups,
            hook_timeout: config.hook_timeout(),
            migration_timeout: config.migration_timeout(),
            force: false,
        }
    }
}

/// Dry-run result for `--check-only`
#[derive(Debug)]
pub struct CheckReport {
    pub version: String,
    pub previous_version: String,
    pub plan: ActionPlan,
    pub prerequisites: PrerequisiteReport,
    pub gate: Gate,
    /// Period and version gates would let a normal run proceed
    pub due: bool,
    /// Worst-case blocking time of the health checks
    pub health_budget: Duration,
}

impl CheckReport {
    pub fn blocked(&self) -> bool {
        !self.prerequisites.passed() || matches!(self.gate, Gate::Blocked { .. })
    }
}

pub struct UpdatePipeline {
    settings: PipelineSettings,
    dispatcher: Box<dyn NotificationDispatcher>,
}

impl UpdatePipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            dispatcher: Box::new(LogDispatcher),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Box<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    fn backups(&self) -> BackupManager {
        BackupManager::new(&self.settings.backup_dir, &self.settings.app_dir)
    }

    fn hooks(&self) -> HookExecutor {
        HookExecutor::new(&self.settings.app_dir)
            .with_hook_timeout(self.settings.hook_timeout)
            .with_migration_timeout(self.settings.migration_timeout)
    }

    fn store(&self) -> StateStore {
        StateStore::new(&self.settings.state_file, self.settings.period)
    }

    /// Version currently installed
    ///
    /// The state file's last version, else the app's `VERSION` file, else
    /// `0.0.0`.
    pub fn installed_version(&self) -> Result<AppVersion> {
        if let Some(state) = self.store().load()? {
            match AppVersion::parse(&state.last_version) {
                Ok(version) => return Ok(version),
                Err(e) => warn!("Ignoring recorded version '{}': {}", state.last_version, e),
            }
        }
        Ok(read_version_file(&self.settings.app_dir).unwrap_or_else(AppVersion::zero))
    }

    /// Run the full pipeline for a staged release
    pub fn run(&self, release: &StagedRelease) -> RunOutcome {
        let _lock = match PipelineLock::try_acquire(&self.settings.lock_file) {
            Ok(lock) => lock,
            Err(Error::Busy { pid }) => {
                warn!("Another update holds {}", self.settings.lock_file.display());
                return RunOutcome::Busy { pid };
            }
            Err(error) => {
                error!("phase={} kind={} {}", RunState::Checking, error.kind(), error);
                return RunOutcome::Failed {
                    state: RunState::Checking,
                    error,
                };
            }
        };

        let previous = match self.recover().and_then(|_| self.installed_version()) {
            Ok(version) => version,
            Err(error) => {
                error!("phase={} kind={} {}", RunState::Checking, error.kind(), error);
                return RunOutcome::Failed {
                    state: RunState::Checking,
                    error,
                };
            }
        };

        let mut run = Run {
            pipeline: self,
            release,
            run_id: new_run_id(),
            state: RunState::Checking,
            previous,
            backups: self.backups(),
            hooks: self.hooks(),
            store: self.store(),
        };
        let outcome = run.execute();
        run.finish(&outcome);
        outcome
    }

    fn recover(&self) -> Result<()> {
        match recover_interrupted_swap(&self.settings.app_dir)? {
            RecoveryOutcome::Clean => {}
            outcome => warn!("Recovered from an interrupted run: {:?}", outcome),
        }
        self.backups().remove_partials()?;
        Ok(())
    }

    /// Everything a run would decide, without taking the lock or mutating
    pub fn check(&self, release: &StagedRelease) -> Result<CheckReport> {
        let manifest = &release.manifest;
        let previous = self.installed_version()?;
        let store = self.store();
        let due = self.settings.force
            || (store.should_run(false)? && !store.already_applied(release.version().as_str())?);

        let plan = RuleResolver::new(manifest).resolve(&release.files()?);
        let prerequisites = PrerequisiteChecker::new(&self.settings.app_dir).check(release);
        let gate = conditionals::evaluate(
            &manifest.conditionals,
            &ConditionContext {
                app_dir: &self.settings.app_dir,
                current_version: &previous,
            },
        );

        Ok(CheckReport {
            version: release.version().to_string(),
            previous_version: previous.to_string(),
            plan,
            prerequisites,
            gate,
            due,
            health_budget: manifest.health_check_budget(),
        })
    }

    /// Restore a specific backup outside the normal pipeline
    pub fn rollback_to(&self, backup_path: &Path) -> RunOutcome {
        let _lock = match PipelineLock::try_acquire(&self.settings.lock_file) {
            Ok(lock) => lock,
            Err(Error::Busy { pid }) => return RunOutcome::Busy { pid },
            Err(error) => {
                return RunOutcome::Failed {
                    state: RunState::RollingBack,
                    error,
                };
            }
        };

        let result = self.recover().and_then(|_| Backup::open(backup_path));
        let backup = match result {
            Ok(backup) => backup,
            Err(error) => {
                error!("phase={} kind={} {}", RunState::RollingBack, error.kind(), error);
                return RunOutcome::Failed {
                    state: RunState::RollingBack,
                    error,
                };
            }
        };

        info!("phase={} backup={}", RunState::RollingBack, backup.meta.id);
        let backups = self.backups();
        let hooks = self.hooks();
        let version = backup.meta.app_version.clone().unwrap_or_else(|| "unknown".to_string());
        let ctx = HookContext {
            version: version.clone(),
            previous_version: None,
        };
        let run_id = new_run_id();
        let rollback_hooks = backup.rollback_hooks();

        let result = RollbackController::new(&backups, &hooks).rollback(&backup, &rollback_hooks, &ctx, &run_id);
        match result {
            Ok(_) => {
                info!("phase={} backup={}", RunState::RolledBack, backup.meta.id);
                if let Err(e) = self.store().commit(&version, RunResult::RolledBack) {
                    error!("Could not record rollback: {}", e);
                }
                RunOutcome::Restored {
                    backup_id: backup.meta.id,
                }
            }
            Err(error) => {
                error!("phase={} kind={} {}", RunState::RollingBack, error.kind(), error);
                RunOutcome::Failed {
                    state: RunState::RollingBack,
                    error,
                }
            }
        }
    }
}

fn new_run_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

/// State for one locked run
struct Run<'p> {
    pipeline: &'p UpdatePipeline,
    release: &'p StagedRelease,
    run_id: String,
    state: RunState,
    previous: AppVersion,
    backups: BackupManager,
    hooks: HookExecutor,
    store: StateStore,
}

impl Run<'_> {
    fn enter(&mut self, state: RunState) {
        info!("phase={} run={}", state, self.run_id);
        self.state = state;
    }

    fn settings(&self) -> &PipelineSettings {
        &self.pipeline.settings
    }

    fn target(&self) -> &AppVersion {
        self.release.version()
    }

    fn hook_context(&self) -> HookContext {
        HookContext {
            version: self.target().to_string(),
            previous_version: Some(self.previous.to_string()),
        }
    }

    fn execute(&mut self) -> RunOutcome {
        self.enter(RunState::Checking);
        match self.checking() {
            Ok(Some(outcome)) => return outcome,
            Ok(None) => {}
            Err(error) => return self.failed(error),
        }

        self.enter(RunState::Prerequisite);
        let report = PrerequisiteChecker::new(&self.settings().app_dir).check(self.release);
        if !report.passed() {
            return self.failed(Error::Prerequisite(report.failures));
        }

        self.enter(RunState::Backup);
        let backup = match self.backup() {
            Ok(backup) => backup,
            Err(error) => {
                // The tree was never touched; only the rollback hooks undo pre_update work
                let rollback_hooks = self.release.manifest.hooks.commands(HookPhase::Rollback);
                self.hooks
                    .run_phase_best_effort(HookPhase::Rollback, rollback_hooks, &self.hook_context());
                return self.failed(error);
            }
        };

        match self.mutate() {
            Ok(failed_checks) => {
                self.enter(RunState::Committed);
                let version = self.target().to_string();
                if failed_checks.is_empty() {
                    RunOutcome::Committed { version }
                } else {
                    RunOutcome::CommittedUnhealthy { version, failed_checks }
                }
            }
            Err(error) => self.roll_back(&backup, error),
        }
    }

    /// Period gate, version gate and conditionals
    fn checking(&self) -> Result<Option<RunOutcome>> {
        let force = self.settings().force;
        if !self.store.should_run(force)? {
            return Ok(Some(RunOutcome::NoOp {
                reason: "already ran in the current period".to_string(),
            }));
        }
        if !force && self.store.already_applied(self.target().as_str())? {
            return Ok(Some(RunOutcome::NoOp {
                reason: format!("version {} is already installed", self.target()),
            }));
        }

        let ctx = ConditionContext {
            app_dir: &self.settings().app_dir,
            current_version: &self.previous,
        };
        Ok(match conditionals::evaluate(&self.release.manifest.conditionals, &ctx) {
            Gate::Proceed => None,
            Gate::Skip { reason } => Some(RunOutcome::Skipped { reason }),
            Gate::Blocked { reason, manual_steps } => Some(RunOutcome::Blocked { reason, manual_steps }),
        })
    }

    fn backup(&self) -> Result<Backup> {
        let manifest = &self.release.manifest;
        let ctx = self.hook_context();
        self.hooks
            .run_phase(HookPhase::PreUpdate, manifest.hooks.commands(HookPhase::PreUpdate), &ctx)?;

        self.backups.create(&SnapshotRequest {
            app_version: Some(self.previous.as_str()),
            target_version: self.target().as_str(),
            run_id: &self.run_id,
            rollback_hooks: manifest.hooks.commands(HookPhase::Rollback),
            directories: &manifest.directories,
            min_disk_space_mb: manifest.requirements.min_disk_space_mb,
        })
    }

    /// APPLYING through HEALTHCHECK; returns checks that failed without
    /// triggering a rollback
    fn mutate(&mut self) -> Result<Vec<String>> {
        let release = self.release;
        let manifest = &release.manifest;
        let target = release.version();
        let ctx = self.hook_context();

        self.enter(RunState::Applying);
        let plan = RuleResolver::new(manifest).resolve(&release.files()?);
        let summary = plan.summary();
        info!(
            "Plan: {} replace, {} merge, {} skip",
            summary.replace, summary.merge, summary.skip
        );
        let report = ApplyStep::new(&self.settings().app_dir, &release.root, manifest).run(&plan, &self.run_id)?;
        for key in &report.degraded {
            warn!("kind=merge_error {} kept its installed content", key);
        }

        self.enter(RunState::Migrating);
        let migrations = manifest.migrations_between(&self.previous, target);
        if !migrations.is_empty() {
            info!("{} migration(s) from {} to {}", migrations.len(), self.previous, target);
        }
        self.hooks.run_migrations(&migrations, &ctx)?;

        self.enter(RunState::Restarting);
        self.hooks
            .run_phase(HookPhase::PostUpdate, manifest.hooks.commands(HookPhase::PostUpdate), &ctx)?;

        self.enter(RunState::Healthcheck);
        if manifest.post_update_tests.is_empty() {
            return Ok(Vec::new());
        }
        info!("Health checks may block for up to {:?}", manifest.health_check_budget());
        let health = HealthChecker::new(&self.settings().app_dir).run_all(&manifest.post_update_tests);
        if health.passed() {
            return Ok(Vec::new());
        }
        let failed = health.failed_checks();
        if manifest.rollback.triggers_on(RollbackTrigger::HealthCheckFail) {
            return Err(Error::HealthCheck(failed));
        }
        warn!(
            "kind=health_check_failure {} failed; auto_rollback_on excludes health_check_fail, keeping the update",
            failed.join(", ")
        );
        Ok(failed)
    }

    fn roll_back(&mut self, backup: &Backup, error: Error) -> RunOutcome {
        let state = self.state;
        error!("phase={} kind={} {}", state, error.kind(), error);

        self.enter(RunState::RollingBack);
        let release = self.release;
        let rollback_hooks = release.manifest.hooks.commands(HookPhase::Rollback);
        let controller = RollbackController::new(&self.backups, &self.hooks);
        match controller.rollback(backup, rollback_hooks, &self.hook_context(), &self.run_id) {
            Ok(_) => {
                self.enter(RunState::RolledBack);
                RunOutcome::RolledBack { state, error }
            }
            Err(rollback_error) => {
                error!(
                    "phase={} kind={} {}",
                    RunState::RollingBack,
                    rollback_error.kind(),
                    rollback_error
                );
                RunOutcome::RollbackFailed {
                    state,
                    error,
                    rollback_error,
                }
            }
        }
    }

    fn failed(&self, error: Error) -> RunOutcome {
        error!("phase={} kind={} {}", self.state, error.kind(), error);
        RunOutcome::Failed {
            state: self.state,
            error,
        }
    }

    /// Record, notify, prune and clean up after a terminal state
    fn finish(&self, outcome: &RunOutcome) {
        let manifest = &self.release.manifest;
        let target = self.target().to_string();
        let previous = self.previous.to_string();

        let record = match outcome {
            RunOutcome::Committed { .. } => Some((target.as_str(), RunResult::Success)),
            RunOutcome::CommittedUnhealthy { .. } => Some((target.as_str(), RunResult::Failed)),
            RunOutcome::RolledBack { .. } => Some((previous.as_str(), RunResult::RolledBack)),
            RunOutcome::Failed { .. } | RunOutcome::RollbackFailed { .. } => {
                Some((previous.as_str(), RunResult::Failed))
            }
            _ => None,
        };
        if let Some((version, result)) = record
            && let Err(e) = self.store.commit(version, result)
        {
            error!("kind={} Could not record run result: {}", e.kind(), e);
        }

        if let RunOutcome::Committed { .. } = outcome {
            let keep = manifest.rollback.keep_backups.unwrap_or(self.settings().keep_backups);
            if let Err(e) = self.backups.prune(keep) {
                warn!("Could not prune backups: {}", e);
            }
            CleanupRunner::new(&self.settings().app_dir).run(manifest);
        }

        let phase = match outcome {
            RunOutcome::NoOp { .. } | RunOutcome::Skipped { .. } | RunOutcome::Busy { .. } => return,
            RunOutcome::Failed { state, .. }
            | RunOutcome::RolledBack { state, .. }
            | RunOutcome::RollbackFailed { state, .. } => *state,
            RunOutcome::Blocked { .. } => RunState::Checking,
            _ => self.state,
        };
        let event = RunEvent {
            phase: phase.to_string(),
            outcome: outcome.name().to_string(),
            version: target,
            succeeded: matches!(outcome, RunOutcome::Committed { .. }),
            error_kind: match outcome {
                RunOutcome::RollbackFailed { rollback_error, .. } => Some(rollback_error.kind().to_string()),
                other => other.error().map(|e| e.kind().to_string()),
            },
            error: match outcome {
                RunOutcome::RollbackFailed { error, rollback_error, .. } => {
                    Some(format!("{}; {}", error, rollback_error))
                }
                RunOutcome::CommittedUnhealthy { failed_checks, .. } => {
                    Some(format!("health checks failed: {}", failed_checks.join(", ")))
                }
                RunOutcome::Blocked { reason, .. } => Some(reason.clone()),
                other => other.error().map(|e| e.to_string()),
            },
            timestamp: Utc::now(),
        };
        notify::notify(self.pipeline.dispatcher.as_ref(), &manifest.notifications, &event);
        info!("Run {} finished: {}", self.run_id, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let rollback_error = || Error::Rollback("x".to_string());
        let cases = [
            (RunOutcome::Committed { version: "1".into() }, 0),
            (RunOutcome::NoOp { reason: "x".into() }, 0),
            (RunOutcome::Skipped { reason: "x".into() }, 0),
            (RunOutcome::Restored { backup_id: "000001-1".into() }, 0),
            (
                RunOutcome::CommittedUnhealthy {
                    version: "1".into(),
                    failed_checks: vec!["api".into()],
                },
                1,
            ),
            (
                RunOutcome::Blocked {
                    reason: "x".into(),
                    manual_steps: vec![],
                },
                1,
            ),
            (
                RunOutcome::Failed {
                    state: RunState::Prerequisite,
                    error: Error::Prerequisite(vec!["disk".into()]),
                },
                1,
            ),
            (
                RunOutcome::RolledBack {
                    state: RunState::Applying,
                    error: Error::Backup("x".into()),
                },
                2,
            ),
            (
                RunOutcome::RollbackFailed {
                    state: RunState::Healthcheck,
                    error: Error::HealthCheck(vec!["api".into()]),
                    rollback_error: rollback_error(),
                },
                1,
            ),
            (RunOutcome::Busy { pid: Some(42) }, 3),
        ];
        for (outcome, code) in cases {
            assert_eq!(outcome.exit_code(), code, "{}", outcome.name());
        }
    }

    #[test]
    fn test_state_names() {
        assert_eq!(RunState::RollingBack.to_string(), "ROLLING_BACK");
        assert_eq!(RunState::Healthcheck.as_str(), "HEALTHCHECK");
    }

    #[test]
    fn test_outcome_display_names_state_and_kind() {
        let outcome = RunOutcome::RolledBack {
            state: RunState::Restarting,
            error: Error::Prerequisite(vec!["disk".into()]),
        };
        let text = outcome.to_string();
        assert!(text.contains("RESTARTING"));
        assert!(text.contains("prerequisite_error"));
    }

    #[test]
    fn test_run_ids_are_short_and_unique() {
        let a = new_run_id();
        let b = new_run_id();
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
    }
}
