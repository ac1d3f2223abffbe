// src/commands/rollback.rs

//! Manual restore of a named backup (`--rollback`)

use anyhow::Result;
use ship::{PipelineSettings, ShipConfig, UpdatePipeline};
use std::path::Path;
use tracing::info;

pub fn cmd_rollback(config: &ShipConfig, backup_path: &Path) -> Result<i32> {
    info!("Manual rollback to {}", backup_path.display());

    let outcome = UpdatePipeline::new(PipelineSettings::from(config)).rollback_to(backup_path);
    if outcome.exit_code() == 0 {
        println!("{}", outcome);
    } else {
        eprintln!("{}", outcome);
    }
    Ok(outcome.exit_code())
}
