//! Operator Notifications
//!
//! The engine mails three kinds of notices:
//! - Per-run failure notices to a flow's callback addresses
//! - Continuous-failure notices when a flow is auto-paused
//! - Serious-error notices to the configured admins when the dispatcher
//!   itself hits a failure

pub mod mail;

use crate::error::NotifyError;

pub use mail::{LogTransport, MailMessage, MailServer, MailService, MailTransport};

/// Sends notices to people.
pub trait Notifier: Send + Sync {
    /// Sends one message to every recipient.
    fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), NotifyError>;

    /// Reports an internal failure to the operators.
    fn send_serious_error(&self, trace: &str) -> Result<(), NotifyError>;
}

/// Subject and body of the notice sent when one run fails.
pub fn failure_notice(flow_name: &str, execution_id: i64, message: &str) -> (String, String) {
    (
        format!("[flowrunner] Flow '{}' failed", flow_name),
        format!(
            "Flow '{}' execution {} did not finish successfully.\n\n{}",
            flow_name, execution_id, message
        ),
    )
}

/// Subject and body of the notice sent when a flow is auto-paused.
pub fn continuous_failure_notice(
    flow_name: &str,
    threshold: u32,
    last_error: &str,
) -> (String, String) {
    (
        format!("[flowrunner] Flow '{}' paused", flow_name),
        format!(
            "Flow '{}' failed in at least {} of its last {} executions and its schedule has been paused.\n\nMost recent error:\n{}",
            flow_name,
            threshold.saturating_sub(1),
            threshold,
            last_error
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuous_failure_notice_mentions_flow_and_threshold() {
        let (subject, body) = continuous_failure_notice("nightly-etl", 3, "disk full");

        assert!(subject.contains("nightly-etl"));
        assert!(body.contains("nightly-etl"));
        assert!(body.contains("last 3 executions"));
        assert!(body.contains("disk full"));
    }

    #[test]
    fn test_failure_notice() {
        let (subject, body) = failure_notice("report", 12, "boom");

        assert!(subject.contains("report"));
        assert!(body.contains("12"));
        assert!(body.ends_with("boom"));
    }
}
