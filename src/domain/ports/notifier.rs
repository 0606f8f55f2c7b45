//! Notifier Port

use crate::domain::value_objects::Severity;

/// Fire-and-forget event sink (webhooks, chat, mail).
///
/// Implementations must not block the caller; delivery failures are logged
/// by the implementation and never reported back.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &str, severity: Severity, message: &str);
}
