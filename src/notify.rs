// src/notify.rs

//! Run notifications
//!
//! The engine emits one [`RunEvent`] per terminal state and hands it, with
//! the manifest's targets, to a [`NotificationDispatcher`]. Delivery never
//! affects the recorded outcome: dispatch errors are logged and dropped.

use crate::manifest::{NotificationTarget, Notifications, TargetKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use tracing::{debug, error, info, warn};

/// Structured event for one finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    /// Last pipeline state reached
    pub phase: String,
    pub outcome: String,
    pub version: String,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Delivers rendered notifications
pub trait NotificationDispatcher {
    fn dispatch(&self, event: &RunEvent, target: &NotificationTarget, message: &str) -> Result<(), String>;
}

/// Dispatcher that writes `log` targets through `tracing`
///
/// Webhook and email delivery belong to an external sender; those targets
/// are only recorded at debug level.
#[derive(Debug, Default)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn dispatch(&self, event: &RunEvent, target: &NotificationTarget, message: &str) -> Result<(), String> {
        match target.kind {
            TargetKind::Log => {
                match target.level.as_deref().unwrap_or("info") {
                    "error" | "critical" => error!("{}", message),
                    "warn" | "warning" => warn!("{}", message),
                    "debug" => debug!("{}", message),
                    _ => info!("{}", message),
                }
                Ok(())
            }
            TargetKind::Webhook | TargetKind::Email => {
                debug!(
                    "{:?} notification for {} left to external delivery ({}): {}",
                    target.kind,
                    event.outcome,
                    target.url.as_deref().unwrap_or("-"),
                    message
                );
                Ok(())
            }
        }
    }
}

/// Render a message template
///
/// Known placeholders: `{version}`, `{error}`, `{timestamp}`, `{system_id}`,
/// `{phase}` and `{outcome}`. Anything else is left as written.
pub fn render(template: &str, event: &RunEvent, system_id: &str) -> String {
    template
        .replace("{version}", &event.version)
        .replace("{error}", event.error.as_deref().unwrap_or(""))
        .replace("{timestamp}", &event.timestamp.to_rfc3339())
        .replace("{system_id}", system_id)
        .replace("{phase}", &event.phase)
        .replace("{outcome}", &event.outcome)
}

/// Send `event` to the targets matching its outcome
pub fn notify(dispatcher: &dyn NotificationDispatcher, notifications: &Notifications, event: &RunEvent) {
    let targets = if event.succeeded {
        &notifications.on_success
    } else {
        &notifications.on_failure
    };
    if targets.is_empty() {
        return;
    }

    let system_id = system_id();
    for target in targets {
        let message = render(&target.message, event, &system_id);
        if let Err(e) = dispatcher.dispatch(event, target, &message) {
            warn!("Notification delivery failed ({:?}): {}", target.kind, e);
        }
    }
}

/// Host identity for notifications: machine id, else hostname
pub fn system_id() -> String {
    if let Ok(id) = fs::read_to_string("/etc/machine-id") {
        let id = id.trim();
        if !id.is_empty() {
            return id.to_string();
        }
    }
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
