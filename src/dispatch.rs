//! Reminder Dispatch Port — the boundary to the chat transport.
//!
//! The core never talks to the messaging platform directly; it hands a
//! payload to this trait and gets back a delivery verdict. Delivery mechanics
//! (push API, formatting, retries at the transport level) live outside this
//! crate. Failures are reported as `false`, never as a panic or an error the
//! scheduler must unwind through.

use serde::Serialize;

/// Everything the transport needs to render one reminder message.
#[derive(Debug, Clone, Serialize)]
pub struct ReminderPayload {
    pub slot_id: String,
    pub meal_label: String,
    pub drugs: Vec<String>,
    /// Rounds already sent for this record; the rendered message may show
    /// "attempt N" as `retry_count + 1`.
    pub retry_count: u32,
}

/// Outbound message port consumed by the scheduler core.
pub trait DispatchPort: Send + Sync {
    /// Deliver a dose reminder. Returns false when delivery failed or timed out.
    fn send_reminder(&self, external_user_id: &str, payload: &ReminderPayload) -> bool;

    /// Deliver a plain status/confirmation message.
    fn send_notice(&self, external_user_id: &str, text: &str) -> bool;
}

/// Dispatch that logs instead of delivering — used for local runs where no
/// transport is wired up.
pub struct LogDispatch;

impl DispatchPort for LogDispatch {
    fn send_reminder(&self, external_user_id: &str, payload: &ReminderPayload) -> bool {
        tracing::info!(
            user = %external_user_id,
            slot = %payload.slot_id,
            attempt = payload.retry_count + 1,
            drugs = ?payload.drugs,
            "reminder (log dispatch)"
        );
        true
    }

    fn send_notice(&self, external_user_id: &str, text: &str) -> bool {
        tracing::info!(user = %external_user_id, text = %text, "notice (log dispatch)");
        true
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    // Verify the port is object-safe (used as `dyn DispatchPort`)
    #[test]
    fn port_is_object_safe() {
        fn _assert(_: &dyn DispatchPort) {}
    }

    #[test]
    fn log_dispatch_reports_success() {
        let payload = ReminderPayload {
            slot_id: "lunch".into(),
            meal_label: "After lunch".into(),
            drugs: vec!["Metformin 500mg".into()],
            retry_count: 0,
        };
        assert!(LogDispatch.send_reminder("ext-1", &payload));
        assert!(LogDispatch.send_notice("ext-1", "hello"));
    }

    #[test]
    fn recording_dispatch_captures_failure_mode() {
        let fake = testing::RecordingDispatch::new();
        assert!(fake.send_notice("ext-1", "first"));
        fake.fail_deliveries();
        assert!(!fake.send_notice("ext-1", "second"));
        // Failed sends are still recorded — the message left the core
        assert_eq!(fake.notice_count(), 2);
    }
}
