// src/commands/manifest.rs

//! Manifest validation (`--test-manifest`)

use anyhow::Result;
use ship::Manifest;
use ship::hooks::HookPhase;
use std::path::Path;
use tracing::info;

/// Parse and validate a manifest without touching anything else
pub fn cmd_test_manifest(path: &Path) -> Result<i32> {
    info!("Validating manifest {}", path.display());

    let manifest = match Manifest::from_file(path) {
        Ok(manifest) => manifest,
        Err(e) => {
            println!("Manifest {} is invalid: {}", path.display(), e);
            return Ok(1);
        }
    };

    println!("Manifest {} is valid", path.display());
    println!("  Version: {}", manifest.version);
    println!("  File rules: {}", manifest.files.len());
    println!("  Directory rules: {}", manifest.directories.len());
    for phase in [HookPhase::PreUpdate, HookPhase::PostUpdate, HookPhase::Rollback] {
        let commands = manifest.hooks.commands(phase);
        if !commands.is_empty() {
            println!("  {} hooks: {}", phase, commands.len());
        }
    }
    if !manifest.migrations.is_empty() {
        println!("  Migrations: {}", manifest.migrations.len());
    }
    if !manifest.post_update_tests.is_empty() {
        println!(
            "  Health checks: {} (may block up to {}s)",
            manifest.post_update_tests.len(),
            manifest.health_check_budget().as_secs()
        );
    }
    Ok(0)
}
