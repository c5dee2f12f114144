//! User-facing notifications.

use tracing::{error, info, warn};

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Surfaces short messages to the user (toast, status line, log).
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);
}

/// Routes notifications to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info => info!(target: "satsip::notice", "{message}"),
            NoticeLevel::Warning => warn!(target: "satsip::notice", "{message}"),
            NoticeLevel::Error => error!(target: "satsip::notice", "{message}"),
        }
    }
}
