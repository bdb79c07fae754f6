//! Local notification surface.

use serde::Serialize;
use tracing::{info, warn};

use crate::types::EventKind;

/// Notifications shown to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Ambient status while background monitoring runs
    MonitoringActive,
    AlertSent { event_type: EventKind },
    AlertFailed { reason: String },
    /// The user has to sign in again
    SessionExpired,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Renders notifications as log lines
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::MonitoringActive => {
                info!(target: "notification", "🛡️ Safety monitoring active");
            }
            Notification::AlertSent { event_type } => {
                info!(target: "notification", "✅ Emergency alert sent ({})", event_type.as_str());
            }
            Notification::AlertFailed { reason } => {
                warn!(target: "notification", "❌ Emergency alert failed: {}", reason);
            }
            Notification::SessionExpired => {
                warn!(target: "notification", "🔒 Session expired, sign in again to send alerts");
            }
        }
    }
}
