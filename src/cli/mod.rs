// src/cli/mod.rs
//! CLI definitions for ship
//!
//! Without a mode flag ship runs the update pipeline once for the first
//! enabled source that has a staged release. The mode flags are mutually
//! exclusive:
//! - `--check-only` - Plan and prerequisite report, no changes
//! - `--rollback` - Restore a specific backup
//! - `--test-manifest` - Validate a manifest file
//! - `--check-rollout` - Prerequisite evaluation for a staged release
//!
//! The command implementations are in the `commands` module.

use clap::{ArgGroup, Parser};
use ship::config::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ship")]
#[command(author = "Ship Contributors")]
#[command(version)]
#[command(about = "Unattended application updater with automatic rollback", long_about = None)]
#[command(group(
    ArgGroup::new("mode")
        .args(["check_only", "rollback", "test_manifest", "check_rollout"])
        .multiple(false)
))]
pub struct Cli {
    /// Path to the engine configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Show what an update would do without changing anything
    #[arg(long)]
    pub check_only: bool,

    /// Run even if this period already ran or the version is installed
    #[arg(long)]
    pub force: bool,

    /// Only consider these update sources
    #[arg(long, num_args = 1.., value_name = "NAME")]
    pub sources: Vec<String>,

    /// Restore the backup at this path
    #[arg(long, value_name = "BACKUP_PATH")]
    pub rollback: Option<PathBuf>,

    /// Validate a manifest file and exit
    #[arg(long, value_name = "PATH")]
    pub test_manifest: Option<PathBuf>,

    /// Evaluate prerequisites for the staged release at this path
    #[arg(long, value_name = "PATH")]
    pub check_rollout: Option<PathBuf>,
}

/// What one invocation does
#[derive(Debug, PartialEq, Eq)]
pub enum Mode<'a> {
    Update,
    CheckOnly,
    Rollback(&'a PathBuf),
    TestManifest(&'a PathBuf),
    CheckRollout(&'a PathBuf),
}

impl Cli {
    pub fn mode(&self) -> Mode<'_> {
        if let Some(path) = &self.test_manifest {
            Mode::TestManifest(path)
        } else if let Some(path) = &self.rollback {
            Mode::Rollback(path)
        } else if let Some(path) = &self.check_rollout {
            Mode::CheckRollout(path)
        } else if self.check_only {
            Mode::CheckOnly
        } else {
            Mode::Update
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_mode_and_sources() {
        let cli = Cli::try_parse_from(["ship", "--force", "--sources", "main", "hotfix"]).unwrap();
        assert_eq!(cli.mode(), Mode::Update);
        assert!(cli.force);
        assert_eq!(cli.sources, vec!["main", "hotfix"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_modes_are_exclusive() {
        let cli = Cli::try_parse_from(["ship", "--test-manifest", "m.yaml"]).unwrap();
        assert_eq!(cli.mode(), Mode::TestManifest(&PathBuf::from("m.yaml")));

        assert!(Cli::try_parse_from(["ship", "--check-only", "--rollback", "/b/1"]).is_err());
    }
}
