// src/conditionals.rs

//! Manifest `conditionals:` expressions
//!
//! Supported forms:
//!
//! ```text
//! file_exists('/etc/myapp/maintenance')
//! service_running('postgresql')
//! env_var('DEPLOY_ENV') == 'production'
//! command('test -f /tmp/ready')
//! current_version < '2.0.0'
//! ```
//!
//! Relative paths in `file_exists` are resolved against the application
//! directory. A condition whose probe cannot run counts as not met.

use crate::hooks::ExternalCommand;
use crate::manifest::{Conditional, ConditionalAction};
use crate::version::AppVersion;
use regex::{Captures, Regex};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const SERVICE_TIMEOUT: Duration = Duration::from_secs(10);

const QUOTED: &str = r#"(?:'([^']*)'|"([^"]*)")"#;

static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^(file_exists|service_running|command)\(\s*{}\s*\)$", QUOTED)).unwrap()
});
static ENV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^env_var\(\s*{}\s*\)\s*(==|!=)\s*{}$", QUOTED, QUOTED)).unwrap()
});
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^current_version\s*(<=|>=|==|!=|<|>)\s*{}$", QUOTED)).unwrap());

/// Comparison used by `env_var` and `current_version`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

impl CompareOp {
    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "<" => Self::Lt,
            "<=" => Self::Le,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            ">=" => Self::Ge,
            ">" => Self::Gt,
            _ => return None,
        })
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Gt => ">",
        }
    }

    fn holds<T: Ord + ?Sized>(&self, left: &T, right: &T) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Eq => left == right,
            Self::Ne => left != right,
            Self::Ge => left >= right,
            Self::Gt => left > right,
        }
    }
}

/// A parsed conditional expression
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    FileExists(String),
    ServiceRunning(String),
    EnvVar {
        name: String,
        op: CompareOp,
        value: String,
    },
    Command(String),
    CurrentVersion { op: CompareOp, version: AppVersion },
}

impl Condition {
    /// Parse an expression, returning a human-readable reason on failure
    pub fn parse(expr: &str) -> Result<Self, String> {
        let expr = expr.trim();

        if let Some(caps) = CALL_RE.captures(expr) {
            let arg = quoted(&caps, 2);
            if arg.is_empty() {
                return Err("empty argument".to_string());
            }
            return Ok(match &caps[1] {
                "file_exists" => Self::FileExists(arg),
                "service_running" => Self::ServiceRunning(arg),
                _ => Self::Command(arg),
            });
        }

        if let Some(caps) = ENV_RE.captures(expr) {
            let name = quoted(&caps, 1);
            if name.is_empty() {
                return Err("empty variable name".to_string());
            }
            let op = CompareOp::parse(&caps[3]).ok_or("unknown operator")?;
            return Ok(Self::EnvVar {
                name,
                op,
                value: quoted(&caps, 4),
            });
        }

        if let Some(caps) = VERSION_RE.captures(expr) {
            let op = CompareOp::parse(&caps[1]).ok_or("unknown operator")?;
            let version = AppVersion::parse(&quoted(&caps, 2))?;
            return Ok(Self::CurrentVersion { op, version });
        }

        Err("unrecognized expression; expected file_exists(), service_running(), env_var() ==, command() or current_version".to_string())
    }

    /// Probe the host
    pub fn is_met(&self, ctx: &ConditionContext<'_>) -> bool {
        match self {
            Self::FileExists(path) => {
                let path = Path::new(path);
                if path.is_absolute() {
                    path.exists()
                } else {
                    ctx.app_dir.join(path).exists()
                }
            }
            Self::ServiceRunning(name) => {
                let probe = ExternalCommand::program("systemctl", &["is-active", "--quiet", name.as_str()], SERVICE_TIMEOUT);
                match probe.run() {
                    Ok(outcome) => outcome.success(),
                    Err(e) => {
                        warn!("Cannot query service {}: {}", name, e);
                        false
                    }
                }
            }
            Self::EnvVar { name, op, value } => {
                let current = std::env::var(name).unwrap_or_default();
                op.holds(current.as_str(), value.as_str())
            }
            Self::Command(script) => {
                let mut probe = ExternalCommand::shell(script, COMMAND_TIMEOUT);
                if ctx.app_dir.is_dir() {
                    probe = probe.current_dir(ctx.app_dir);
                }
                match probe.run() {
                    Ok(outcome) => {
                        outcome.relay("condition");
                        outcome.success()
                    }
                    Err(e) => {
                        warn!("Cannot run condition command '{}': {}", script, e);
                        false
                    }
                }
            }
            Self::CurrentVersion { op, version } => op.holds(ctx.current_version, version),
        }
    }
}

fn quoted(caps: &Captures<'_>, group: usize) -> String {
    caps.get(group)
        .or_else(|| caps.get(group + 1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileExists(path) => write!(f, "file_exists('{}')", path),
            Self::ServiceRunning(name) => write!(f, "service_running('{}')", name),
            Self::EnvVar { name, op, value } => write!(f, "env_var('{}') {} '{}'", name, op.symbol(), value),
            Self::Command(script) => write!(f, "command('{}')", script),
            Self::CurrentVersion { op, version } => write!(f, "current_version {} '{}'", op.symbol(), version),
        }
    }
}

/// Host facts conditions are evaluated against
#[derive(Debug, Clone, Copy)]
pub struct ConditionContext<'a> {
    pub app_dir: &'a Path,
    pub current_version: &'a AppVersion,
}

/// What the conditionals decided for this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    Skip { reason: String },
    Blocked { reason: String, manual_steps: Vec<String> },
}

/// Evaluate conditionals in declaration order
///
/// The first met condition with a `skip_update` or
/// `require_manual_intervention` action decides. `warn` conditions log and
/// evaluation continues.
pub fn evaluate(conditionals: &[Conditional], ctx: &ConditionContext<'_>) -> Gate {
    for conditional in conditionals {
        let met = conditional.condition.is_met(ctx);
        debug!("Condition {} -> {}", conditional.condition, met);
        if !met {
            continue;
        }

        let reason = conditional
            .message
            .clone()
            .unwrap_or_else(|| format!("condition {} met", conditional.condition));

        match conditional.action {
            ConditionalAction::Continue => {}
            ConditionalAction::Warn => warn!("{}", reason),
            ConditionalAction::SkipUpdate => {
                info!("Skipping update: {}", reason);
                return Gate::Skip { reason };
            }
            ConditionalAction::RequireManualIntervention => {
                return Gate::Blocked {
                    reason,
                    manual_steps: conditional.manual_steps.clone(),
                };
            }
        }
    }
    Gate::Proceed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn version(s: &str) -> AppVersion {
        AppVersion::parse(s).unwrap()
    }

    fn conditional(expr: &str, action: ConditionalAction) -> Conditional {
        Conditional {
            condition: Condition::parse(expr).unwrap(),
            action,
            message: Some(format!("hit {}", expr)),
            manual_steps: vec!["step one".to_string()],
        }
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            Condition::parse("file_exists('/etc/x')").unwrap(),
            Condition::FileExists("/etc/x".to_string())
        );
        assert_eq!(
            Condition::parse("service_running(\"nginx\")").unwrap(),
            Condition::ServiceRunning("nginx".to_string())
        );
        assert_eq!(
            Condition::parse("env_var('DEPLOY_ENV') == 'production'").unwrap(),
            Condition::EnvVar {
                name: "DEPLOY_ENV".to_string(),
                op: CompareOp::Eq,
                value: "production".to_string()
            }
        );
        assert_eq!(
            Condition::parse("command(\"test -f 'a b'\")").unwrap(),
            Condition::Command("test -f 'a b'".to_string())
        );
        assert_eq!(
            Condition::parse("current_version >= '2.0'").unwrap(),
            Condition::CurrentVersion {
                op: CompareOp::Ge,
                version: version("2.0")
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_forms() {
        assert!(Condition::parse("disk_free() > 10").is_err());
        assert!(Condition::parse("file_exists('')").is_err());
        assert!(Condition::parse("file_exists(/etc/x)").is_err());
        assert!(Condition::parse("current_version ~ '1.0'").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for expr in ["file_exists('a')", "env_var('A') != 'b'", "current_version < '1.2.0'"] {
            let parsed = Condition::parse(expr).unwrap();
            assert_eq!(Condition::parse(&parsed.to_string()).unwrap(), parsed);
        }
    }

    #[test]
    fn test_file_exists_relative_to_app_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("MAINTENANCE"), "").unwrap();
        let current = version("1.0.0");
        let ctx = ConditionContext {
            app_dir: temp.path(),
            current_version: &current,
        };

        assert!(Condition::FileExists("MAINTENANCE".to_string()).is_met(&ctx));
        assert!(!Condition::FileExists("missing".to_string()).is_met(&ctx));
    }

    #[test]
    fn test_command_and_version_conditions() {
        let temp = TempDir::new().unwrap();
        let current = version("1.4.0");
        let ctx = ConditionContext {
            app_dir: temp.path(),
            current_version: &current,
        };

        assert!(Condition::parse("command('true')").unwrap().is_met(&ctx));
        assert!(!Condition::parse("command('exit 3')").unwrap().is_met(&ctx));
        assert!(Condition::parse("current_version < '2.0.0'").unwrap().is_met(&ctx));
        assert!(!Condition::parse("current_version == '1.3.0'").unwrap().is_met(&ctx));
    }

    #[test]
    fn test_evaluate_first_deciding_condition_wins() {
        let temp = TempDir::new().unwrap();
        let current = version("1.0.0");
        let ctx = ConditionContext {
            app_dir: temp.path(),
            current_version: &current,
        };
        let conditionals = vec![
            conditional("command('false')", ConditionalAction::SkipUpdate),
            conditional("command('true')", ConditionalAction::Warn),
            conditional("command('true')", ConditionalAction::RequireManualIntervention),
            conditional("command('true')", ConditionalAction::SkipUpdate),
        ];

        match evaluate(&conditionals, &ctx) {
            Gate::Blocked { reason, manual_steps } => {
                assert_eq!(reason, "hit command('true')");
                assert_eq!(manual_steps, vec!["step one".to_string()]);
            }
            other => panic!("unexpected gate {:?}", other),
        }
    }

    #[test]
    fn test_evaluate_proceeds_when_nothing_met() {
        let temp = TempDir::new().unwrap();
        let current = version("1.0.0");
        let ctx = ConditionContext {
            app_dir: temp.path(),
            current_version: &current,
        };
        let conditionals = vec![
            conditional("file_exists('nope')", ConditionalAction::SkipUpdate),
            conditional("command('true')", ConditionalAction::Continue),
        ];

        assert_eq!(evaluate(&conditionals, &ctx), Gate::Proceed);
    }
}
