//! Navigation and notification collaborators
//!
//! The client never renders UI or owns routing. On terminal session failure
//! it asks the navigator to redirect to the login surface and, advisory only,
//! tells the notifier so a toast can be shown.

use tracing::{error, info, warn};

/// Severity attached to user-visible notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Routing collaborator, invoked once per terminal session failure.
pub trait Navigator: Send + Sync {
    fn redirect_to_login(&self, reason: &str);
}

/// User-facing notification collaborator. Not required for correctness.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, severity: Severity);
}

/// Navigator for headless use: records the redirect in the log only.
#[derive(Debug, Clone)]
pub struct LogNavigator {
    login_route: String,
}

impl LogNavigator {
    pub fn new(login_route: impl Into<String>) -> Self {
        Self {
            login_route: login_route.into(),
        }
    }
}

impl Default for LogNavigator {
    fn default() -> Self {
        Self::new(session_auth::DEFAULT_LOGIN_ROUTE)
    }
}

impl Navigator for LogNavigator {
    fn redirect_to_login(&self, reason: &str) {
        warn!(route = %self.login_route, reason, "session ended, redirecting to login");
    }
}

/// Notifier that forwards notifications to `tracing` at a matching level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!(severity = severity.label(), "{message}"),
            Severity::Warning => warn!(severity = severity.label(), "{message}"),
            Severity::Error => error!(severity = severity.label(), "{message}"),
        }
    }
}
