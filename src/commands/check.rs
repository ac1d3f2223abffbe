// src/commands/check.rs

//! Dry runs: `--check-only` and `--check-rollout`
//!
//! Neither touches the application directory, the backups or the state
//! file. Exit code 0 means a run could proceed, 2 means it would be blocked.

use super::find_staged_release;
use anyhow::{Context, Result};
use ship::conditionals::Gate;
use ship::requirements::{PrerequisiteChecker, PrerequisiteReport};
use ship::resolver::Resolution;
use ship::{PipelineSettings, ShipConfig, StagedRelease, UpdatePipeline};
use std::path::Path;
use tracing::info;

/// Report what the next update would do
pub fn cmd_check(config: &ShipConfig, sources: &[String], force: bool) -> Result<i32> {
    let Some(release) = find_staged_release(config, sources)? else {
        println!("No staged release found");
        return Ok(0);
    };

    let mut settings = PipelineSettings::from(config);
    settings.force = force;
    let report = UpdatePipeline::new(settings)
        .check(&release)
        .context("Failed to evaluate staged release")?;

    println!(
        "Release {} from source '{}' (installed: {})",
        report.version, release.source, report.previous_version
    );
    if !report.due {
        println!("A normal run would be a no-op (use --force to run anyway)");
    }

    let summary = report.plan.summary();
    println!(
        "\nPlan: {} replace, {} merge, {} skip",
        summary.replace, summary.merge, summary.skip
    );
    for (key, action) in report.plan.iter() {
        let reason = match &action.resolution {
            Resolution::Rule { pattern, .. } => format!("rule '{}'", pattern),
            Resolution::Preserved { directory } => format!("preserved '{}'", directory),
            Resolution::Default => "default".to_string(),
        };
        let backup = if action.keeps_backup_copy() { " +.backup" } else { "" };
        println!("  {:<15} {}{}  ({})", action.action.name(), key, backup, reason);
    }

    print_prerequisites(&report.prerequisites);

    match &report.gate {
        Gate::Proceed => {}
        Gate::Skip { reason } => println!("\nConditionals: update would be skipped ({})", reason),
        Gate::Blocked { reason, manual_steps } => {
            println!("\nConditionals: manual intervention required ({})", reason);
            for step in manual_steps {
                println!("  - {}", step);
            }
        }
    }

    if report.health_budget.as_secs() > 0 {
        println!("\nHealth checks may block for up to {}s", report.health_budget.as_secs());
    }

    Ok(if report.blocked() { 2 } else { 0 })
}

/// Evaluate prerequisites for a release directory
pub fn cmd_check_rollout(config: &ShipConfig, release_dir: &Path) -> Result<i32> {
    info!("Evaluating prerequisites for {}", release_dir.display());

    // A configured source pointing at the same directory lends its name and verified flag
    let source = config
        .sources
        .iter()
        .find(|(_, source)| source.staging_dir == release_dir);
    let (name, verified) = match source {
        Some((name, source)) => (name.as_str(), source.verified),
        None => ("cli", false),
    };

    let release = StagedRelease::open(name, release_dir, verified, &config.general.manifest_name)
        .with_context(|| format!("Failed to open staged release {}", release_dir.display()))?;
    let report = PrerequisiteChecker::new(&config.general.app_dir).check(&release);

    println!("Release {} ({})", release.version(), release_dir.display());
    print_prerequisites(&report);
    Ok(if report.passed() { 0 } else { 2 })
}

fn print_prerequisites(report: &PrerequisiteReport) {
    if report.passed() {
        println!("\nPrerequisites: all met");
        return;
    }
    println!("\nPrerequisites: {} failed", report.failures.len());
    for failure in &report.failures {
        println!("  [FAIL] {}", failure);
    }
}
