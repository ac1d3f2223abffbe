// tests/rollback.rs

//! Manual rollback, dry runs and configuration-driven runs.

mod common;

use common::{Fixture, snapshot};
use ship::conditionals::Gate;
use ship::{PipelineSettings, RunOutcome, RunState, ShipConfig, UpdatePipeline};
use std::fs;

fn v1_installed_v2_staged(fx: &Fixture) {
    fx.write_app("VERSION", "1.0.0\n");
    fx.write_app("app.py", "print('v1')\n");
    fx.write_app("lib/util.py", "helpers v1\n");
    fx.write_release("VERSION", "2.0.0\n");
    fx.write_release("app.py", "print('v2')\n");
    fx.write_release("lib/new.py", "new module\n");
    fx.manifest("version: '2.0.0'\nfiles: {}\ndirectories: {}\n");
}

#[test]
fn test_rollback_to_named_backup() {
    let fx = Fixture::new();
    v1_installed_v2_staged(&fx);
    let v1 = snapshot(&fx.app);

    let outcome = fx.pipeline().run(&fx.release());
    assert!(matches!(outcome, RunOutcome::Committed { .. }));
    assert_eq!(fx.read_app("app.py"), "print('v2')\n");

    let backup = fx.backup_dir().join(&fx.backups()[0]);
    let outcome = fx.pipeline().rollback_to(&backup);

    assert!(matches!(outcome, RunOutcome::Restored { .. }), "{:?}", outcome);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(snapshot(&fx.app), v1);

    let state = fx.state().unwrap();
    assert_eq!(state["last_version"], "1.0.0");
    assert_eq!(state["last_result"], "rolled_back");
}

#[test]
fn test_rollback_refuses_tampered_backup() {
    let fx = Fixture::new();
    v1_installed_v2_staged(&fx);
    assert!(matches!(fx.pipeline().run(&fx.release()), RunOutcome::Committed { .. }));
    let v2 = snapshot(&fx.app);

    let backup = fx.backup_dir().join(&fx.backups()[0]);
    fs::write(backup.join("tree").join("app.py"), "print('evil')\n").unwrap();

    let outcome = fx.pipeline().rollback_to(&backup);

    match &outcome {
        RunOutcome::Failed { state, error } => {
            assert_eq!(*state, RunState::RollingBack);
            assert_eq!(error.kind(), "rollback_error");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(snapshot(&fx.app), v2);
}

#[test]
fn test_rollback_to_missing_backup() {
    let fx = Fixture::new();
    v1_installed_v2_staged(&fx);

    let outcome = fx.pipeline().rollback_to(&fx.backup_dir().join("000042-9.9.9"));

    assert!(matches!(outcome, RunOutcome::Failed { state: RunState::RollingBack, .. }));
    assert_eq!(fx.read_app("app.py"), "print('v1')\n");
}

#[test]
fn test_check_reports_without_mutating() {
    let fx = Fixture::new();
    v1_installed_v2_staged(&fx);
    fx.manifest(
        r#"version: '2.0.0'
files:
  'lib/*.py':
    action: skip
directories: {}
requirements:
  required_commands: [ship-test-no-such-command]
"#,
    );
    let before = snapshot(&fx.app);

    let report = fx.pipeline().check(&fx.release()).unwrap();

    assert_eq!(report.version, "2.0.0");
    assert_eq!(report.previous_version, "1.0.0");
    assert!(report.due);
    let summary = report.plan.summary();
    assert_eq!((summary.replace, summary.skip), (2, 1));
    assert!(!report.prerequisites.passed());
    assert_eq!(report.gate, Gate::Proceed);
    assert!(report.blocked());

    assert_eq!(snapshot(&fx.app), before);
    assert!(fx.backups().is_empty());
    assert!(fx.state().is_none());
}

#[test]
fn test_check_after_commit_is_not_due() {
    let fx = Fixture::new();
    v1_installed_v2_staged(&fx);
    assert!(matches!(fx.pipeline().run(&fx.release()), RunOutcome::Committed { .. }));

    let report = fx.pipeline().check(&fx.release()).unwrap();
    assert!(!report.due);
    assert!(!report.blocked());
    assert_eq!(report.previous_version, "2.0.0");

    let forced = fx.forced_pipeline().check(&fx.release()).unwrap();
    assert!(forced.due);
}

#[test]
fn test_run_from_config_file() {
    let fx = Fixture::new();
    v1_installed_v2_staged(&fx);
    let config_path = fx.scratch("ship.toml");
    fs::write(&config_path, fx.config_toml()).unwrap();

    let config = ShipConfig::load(&config_path).unwrap();
    let sources = config.selected_sources(&[]).unwrap();
    assert_eq!(sources.len(), 1);
    let (name, source) = sources[0];
    let release =
        ship::StagedRelease::open(name, &source.staging_dir, source.verified, &config.general.manifest_name).unwrap();

    let settings = PipelineSettings::from(&config);
    assert_eq!(settings.backup_dir, fx.backup_dir());
    let outcome = UpdatePipeline::new(settings).run(&release);

    assert!(matches!(outcome, RunOutcome::Committed { .. }));
    assert_eq!(fx.read_app("lib/new.py"), "new module\n");
    assert_eq!(fx.read_app("lib/util.py"), "helpers v1\n");
}

#[test]
fn test_unverified_release_blocked_by_checksum_policy() {
    let fx = Fixture::new();
    v1_installed_v2_staged(&fx);
    fx.manifest("version: '2.0.0'\nfiles: {}\ndirectories: {}\nsecurity:\n  verify_checksums: true\n");
    let before = snapshot(&fx.app);

    let release = ship::StagedRelease::open("manual", &fx.staging, false, ship::MANIFEST_FILE).unwrap();
    let outcome = fx.pipeline().run(&release);

    assert!(matches!(outcome, RunOutcome::Failed { state: RunState::Prerequisite, .. }));
    assert_eq!(snapshot(&fx.app), before);
}
