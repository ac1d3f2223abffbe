// build.rs

use clap::{Arg, ArgAction, ArgGroup, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Mirrors `src/cli/mod.rs`; the binary's types are not visible to build scripts
fn build_cli() -> Command {
    Command::new("ship")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Ship Contributors")
        .about("Unattended application updater with automatic rollback")
        .long_about(
            "Applies the first staged release found in the configured sources to the \
             live application directory, backing it up first and rolling back on failure. \
             Exit codes: 0 success or nothing to do, 1 error, 2 rolled back (or blocked \
             with --check-only), 3 another run holds the lock.",
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .default_value("/etc/ship/ship.toml")
                .help("Path to the engine configuration file"),
        )
        .arg(
            Arg::new("check_only")
                .long("check-only")
                .action(ArgAction::SetTrue)
                .help("Show what an update would do without changing anything"),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .action(ArgAction::SetTrue)
                .help("Run even if this period already ran or the version is installed"),
        )
        .arg(
            Arg::new("sources")
                .long("sources")
                .num_args(1..)
                .value_name("NAME")
                .help("Only consider these update sources"),
        )
        .arg(
            Arg::new("rollback")
                .long("rollback")
                .value_name("BACKUP_PATH")
                .help("Restore the backup at this path"),
        )
        .arg(
            Arg::new("test_manifest")
                .long("test-manifest")
                .value_name("PATH")
                .help("Validate a manifest file and exit"),
        )
        .arg(
            Arg::new("check_rollout")
                .long("check-rollout")
                .value_name("PATH")
                .help("Evaluate prerequisites for the staged release at this path"),
        )
        .group(
            ArgGroup::new("mode")
                .args(["check_only", "rollback", "test_manifest", "check_rollout"])
                .multiple(false),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("ship.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
