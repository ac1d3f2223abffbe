// src/health/mod.rs

//! Post-update health checks
//!
//! Each check gets `1 + retry_count` attempts with a constant delay between
//! them. Every check runs even after an earlier one failed, so the report
//! always covers the whole list. A check blocks the pipeline for at most
//! `(retry_count + 1) * timeout + retry_count * retry_delay`; see
//! [`HealthCheck::worst_case`] and [`crate::manifest::Manifest::health_check_budget`].

use crate::hooks::ExternalCommand;
use crate::manifest::HealthCheck;
use std::path::PathBuf;
use std::thread;
use tracing::{error, info, warn};

/// Final result of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub attempts: u32,
    /// Exit code of the last attempt, `None` for a timeout or spawn failure
    pub last_exit: Option<i32>,
    pub timed_out: bool,
}

/// Results of a full health-check run
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub results: Vec<CheckResult>,
}

impl HealthReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failed_checks(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.name.clone())
            .collect()
    }
}

pub struct HealthChecker {
    app_dir: PathBuf,
}

impl HealthChecker {
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
        }
    }

    /// Run every check and collect the results
    pub fn run_all(&self, checks: &[HealthCheck]) -> HealthReport {
        let mut report = HealthReport::default();
        for check in checks {
            report.results.push(self.run_check(check));
        }

        if report.passed() {
            info!("All {} health check(s) passed", report.results.len());
        } else {
            error!("Health checks failed: {}", report.failed_checks().join(", "));
        }
        report
    }

    fn run_check(&self, check: &HealthCheck) -> CheckResult {
        let total = check.retry_count + 1;
        let mut result = CheckResult {
            name: check.name.clone(),
            passed: false,
            attempts: 0,
            last_exit: None,
            timed_out: false,
        };

        for attempt in 1..=total {
            if attempt > 1 {
                thread::sleep(check.retry_delay);
            }
            result.attempts = attempt;

            let mut cmd = ExternalCommand::shell(&check.command, check.timeout);
            if self.app_dir.is_dir() {
                cmd = cmd.current_dir(&self.app_dir);
            }

            match cmd.run() {
                Ok(outcome) => {
                    outcome.relay(&check.name);
                    result.last_exit = outcome.code();
                    result.timed_out = outcome.timed_out();
                    if outcome.success() {
                        info!("Health check '{}' passed (attempt {}/{})", check.name, attempt, total);
                        result.passed = true;
                        return result;
                    }
                }
                Err(e) => {
                    result.last_exit = None;
                    result.timed_out = false;
                    warn!("Health check '{}' could not start: {}", check.name, e);
                }
            }

            let remaining = total - attempt;
            if result.timed_out {
                warn!(
                    "Health check '{}' timed out after {:?} ({} retries left)",
                    check.name, check.timeout, remaining
                );
            } else {
                warn!(
                    "Health check '{}' failed with {:?} ({} retries left)",
                    check.name, result.last_exit, remaining
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn check(name: &str, command: &str, retry_count: u32) -> HealthCheck {
        HealthCheck {
            name: name.to_string(),
            command: command.to_string(),
            timeout: Duration::from_secs(5),
            retry_count,
            retry_delay: Duration::from_millis(50),
        }
    }

    /// Fails until it has been invoked `n` times, counting invocations in `file`
    fn flaky(file: &std::path::Path, succeed_on: u32) -> String {
        format!(
            "n=$(cat {f} 2>/dev/null || echo 0); n=$((n+1)); echo $n > {f}; [ $n -ge {s} ]",
            f = file.display(),
            s = succeed_on
        )
    }

    #[test]
    fn test_retry_until_pass() {
        let temp = TempDir::new().unwrap();
        let counter = temp.path().join("count");
        let checker = HealthChecker::new(temp.path());

        let report = checker.run_all(&[check("flaky", &flaky(&counter, 3), 3)]);

        assert!(report.passed());
        assert_eq!(report.results[0].attempts, 3);
        assert_eq!(fs::read_to_string(&counter).unwrap().trim(), "3");
    }

    #[test]
    fn test_exhausted_retries_fail() {
        let temp = TempDir::new().unwrap();
        let counter = temp.path().join("count");
        let checker = HealthChecker::new(temp.path());

        let report = checker.run_all(&[check("down", &flaky(&counter, 10), 2)]);

        assert!(!report.passed());
        assert_eq!(report.results[0].attempts, 3);
        assert_eq!(report.results[0].last_exit, Some(1));
    }

    #[test]
    fn test_all_checks_run_after_failure() {
        let temp = TempDir::new().unwrap();
        let checker = HealthChecker::new(temp.path());

        let report = checker.run_all(&[check("first", "false", 0), check("second", "touch ran", 0)]);

        assert!(!report.passed());
        assert_eq!(report.failed_checks(), vec!["first".to_string()]);
        assert!(temp.path().join("ran").exists());
    }

    #[test]
    fn test_timeout_counts_as_failure() {
        let temp = TempDir::new().unwrap();
        let checker = HealthChecker::new(temp.path());
        let mut slow = check("slow", "sleep 30", 0);
        slow.timeout = Duration::from_millis(200);

        let report = checker.run_all(&[slow]);

        assert!(!report.passed());
        assert!(report.results[0].timed_out);
    }
}
