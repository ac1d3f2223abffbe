// src/requirements.rs

//! Prerequisite checks run before anything is backed up
//!
//! Every check runs; failures are collected so the operator sees the full
//! list in one report.

use crate::filesystem::{self, path::match_key};
use crate::hooks::ExternalCommand;
use crate::manifest::{Manifest, SecurityPolicy};
use crate::release::StagedRelease;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const MB: u64 = 1024 * 1024;
const ENV_CHECK_TIMEOUT: Duration = Duration::from_secs(30);
const SERVICE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of the PREREQUISITE phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrerequisiteReport {
    pub failures: Vec<String>,
}

impl PrerequisiteReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct PrerequisiteChecker<'a> {
    app_dir: &'a Path,
}

impl<'a> PrerequisiteChecker<'a> {
    pub fn new(app_dir: &'a Path) -> Self {
        Self { app_dir }
    }

    /// Check host requirements and the staged release's security policy
    pub fn check(&self, release: &StagedRelease) -> PrerequisiteReport {
        let mut report = PrerequisiteReport::default();
        self.check_host(&release.manifest, &mut report.failures);
        check_security(release, &mut report.failures);

        if report.passed() {
            info!("All prerequisites met");
        } else {
            for failure in &report.failures {
                warn!("Prerequisite failed: {}", failure);
            }
        }
        report
    }

    fn check_host(&self, manifest: &Manifest, failures: &mut Vec<String>) {
        let requirements = &manifest.requirements;

        if requirements.min_disk_space_mb > 0 {
            match filesystem::available_space(self.app_dir) {
                Ok(available) if available < requirements.min_disk_space_mb.saturating_mul(MB) => failures.push(format!(
                    "need {} MB free near {}, {} MB available",
                    requirements.min_disk_space_mb,
                    self.app_dir.display(),
                    available / MB
                )),
                Ok(_) => {}
                Err(e) => failures.push(format!("cannot determine free disk space: {}", e)),
            }
        }

        for command in &requirements.required_commands {
            match which::which(command) {
                Ok(path) => debug!("Found {} at {}", command, path.display()),
                Err(_) => failures.push(format!("required command not found: {}", command)),
            }
        }

        for service in &requirements.required_services {
            let probe = ExternalCommand::program("systemctl", &["is-active", "--quiet", service.as_str()], SERVICE_TIMEOUT);
            match probe.run() {
                Ok(outcome) if outcome.success() => {}
                Ok(_) => failures.push(format!("required service not running: {}", service)),
                Err(e) => failures.push(format!("cannot query service {}: {}", service, e)),
            }
        }

        for check in &requirements.environment_checks {
            let mut probe = ExternalCommand::shell(&check.command, ENV_CHECK_TIMEOUT);
            if self.app_dir.is_dir() {
                probe = probe.current_dir(self.app_dir);
            }
            match probe.run() {
                Ok(outcome) if outcome.success() => debug!("Environment check {} passed", check.name),
                Ok(outcome) => {
                    outcome.relay(&check.name);
                    failures.push(format!("environment check failed: {}", check.name));
                }
                Err(e) => failures.push(format!("environment check {} could not run: {}", check.name, e)),
            }
        }
    }
}

fn check_security(release: &StagedRelease, failures: &mut Vec<String>) {
    let policy = &release.manifest.security;

    if policy.verify_checksums && !release.verified {
        failures.push(format!(
            "checksum verification required but source {} did not verify the release",
            release.source
        ));
    }

    if policy.allowed_file_types.is_empty() && policy.max_file_size_mb.is_none() {
        return;
    }

    let files = match release.files() {
        Ok(files) => files,
        Err(e) => {
            failures.push(format!("cannot list staged release: {}", e));
            return;
        }
    };
    for rel in files {
        if let Some(reason) = file_violation(policy, &release.root, &rel) {
            failures.push(reason);
        }
    }
}

/// Policy violation for one staged file
///
/// Files without an extension are not subject to `allowed_file_types`.
fn file_violation(policy: &SecurityPolicy, root: &Path, rel: &Path) -> Option<String> {
    let key = match_key(rel);

    if !policy.allowed_file_types.is_empty()
        && let Some(ext) = rel.extension()
    {
        let ext = format!(".{}", ext.to_string_lossy().to_lowercase());
        if !policy.allowed_file_types.iter().any(|allowed| allowed.to_lowercase() == ext) {
            return Some(format!("file type not allowed: {} ({})", key, ext));
        }
    }

    if let Some(max_mb) = policy.max_file_size_mb {
        match fs::symlink_metadata(root.join(rel)) {
            Ok(meta) if meta.len() > max_mb.saturating_mul(MB) => {
                return Some(format!("file too large: {} ({} bytes, limit {} MB)", key, meta.len(), max_mb));
            }
            Ok(_) => {}
            Err(e) => return Some(format!("cannot stat {}: {}", key, e)),
        }
    }
    None
}
