// src/commands/update.rs

//! The default mode: one pipeline run

use super::find_staged_release;
use anyhow::Result;
use ship::{PipelineSettings, RunOutcome, ShipConfig, UpdatePipeline};
use tracing::info;

/// Apply the first staged release found and return the outcome's exit code
pub fn cmd_update(config: &ShipConfig, sources: &[String], force: bool) -> Result<i32> {
    let Some(release) = find_staged_release(config, sources)? else {
        info!("No staged release found; nothing to do");
        return Ok(0);
    };

    let mut settings = PipelineSettings::from(config);
    settings.force = force;
    let outcome = UpdatePipeline::new(settings).run(&release);

    match &outcome {
        RunOutcome::RollbackFailed { .. } => {
            eprintln!("ROLLBACK FAILED: {}", outcome);
            eprintln!(
                "The application in {} may be inconsistent; manual intervention is required.",
                config.general.app_dir.display()
            );
        }
        outcome if outcome.exit_code() == 0 => println!("{}", outcome),
        outcome => eprintln!("{}", outcome),
    }
    Ok(outcome.exit_code())
}
