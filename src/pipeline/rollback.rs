// src/pipeline/rollback.rs

//! ROLLING_BACK: restore the run's backup, then run the rollback hooks

use crate::backup::{Backup, BackupManager};
use crate::error::Result;
use crate::hooks::{HookContext, HookExecutor, HookPhase};
use crate::manifest::HookCommand;
use tracing::{error, info};

pub struct RollbackController<'a> {
    backups: &'a BackupManager,
    hooks: &'a HookExecutor,
}

/// Result of a completed restore
#[derive(Debug, Default)]
pub struct RollbackReport {
    /// Rollback hook commands that failed; the tree itself was restored
    pub hook_failures: Vec<String>,
}

impl<'a> RollbackController<'a> {
    pub fn new(backups: &'a BackupManager, hooks: &'a HookExecutor) -> Self {
        Self { backups, hooks }
    }

    /// Restore `backup` and run `rollback_hooks`
    ///
    /// A failed restore is an [`Error::Rollback`](crate::Error::Rollback)
    /// and no hooks run. Hook failures after a good restore are reported but
    /// do not undo the restore.
    pub fn rollback(
        &self,
        backup: &Backup,
        rollback_hooks: &[HookCommand],
        ctx: &HookContext,
        run_id: &str,
    ) -> Result<RollbackReport> {
        info!("Rolling back to backup {}", backup.meta.id);
        self.backups.restore(backup, run_id)?;

        let hook_failures: Vec<String> = self
            .hooks
            .run_phase_best_effort(HookPhase::Rollback, rollback_hooks, ctx)
            .into_iter()
            .map(|e| e.to_string())
            .collect();
        if !hook_failures.is_empty() {
            error!(
                "Backup {} restored but {} rollback hook(s) failed",
                backup.meta.id,
                hook_failures.len()
            );
        }
        Ok(RollbackReport { hook_failures })
    }
}
