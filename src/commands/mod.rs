// src/commands/mod.rs
//! Command handlers for the ship CLI
//!
//! Handlers return the process exit code; `anyhow` errors become exit 1.

mod check;
mod manifest;
mod rollback;
mod update;

pub use check::{cmd_check, cmd_check_rollout};
pub use manifest::cmd_test_manifest;
pub use rollback::cmd_rollback;
pub use update::cmd_update;

use anyhow::{Context, Result};
use ship::{ShipConfig, StagedRelease};
use tracing::debug;

/// First selected source with a staged release waiting
pub(crate) fn find_staged_release(config: &ShipConfig, sources: &[String]) -> Result<Option<StagedRelease>> {
    let manifest_name = &config.general.manifest_name;
    for (name, source) in config.selected_sources(sources)? {
        if !source.staging_dir.join(manifest_name).is_file() {
            debug!("Source {} has nothing staged in {}", name, source.staging_dir.display());
            continue;
        }
        let release = StagedRelease::open(name, &source.staging_dir, source.verified, manifest_name)
            .with_context(|| format!("Failed to open staged release from source '{}'", name))?;
        return Ok(Some(release));
    }
    Ok(None)
}
