// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Mode};
use ship::ShipConfig;
use std::process;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over the configured level
fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}

fn run(cli: &Cli) -> Result<i32> {
    if let Mode::TestManifest(path) = cli.mode() {
        init_tracing("info");
        return commands::cmd_test_manifest(path);
    }

    let config = match ShipConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            return Err(e);
        }
    };
    init_tracing(&config.general.log_level);

    match cli.mode() {
        Mode::Update => commands::cmd_update(&config, &cli.sources, cli.force),
        Mode::CheckOnly => commands::cmd_check(&config, &cli.sources, cli.force),
        Mode::Rollback(path) => commands::cmd_rollback(&config, path),
        Mode::CheckRollout(path) => commands::cmd_check_rollout(&config, path),
        Mode::TestManifest(path) => commands::cmd_test_manifest(path),
    }
}

fn main() {
    let cli = Cli::parse();

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    };
    process::exit(code);
}
