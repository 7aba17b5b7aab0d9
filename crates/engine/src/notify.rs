//! Notification port.
//!
//! Events are fire-and-forget: the dispatcher reports delivered/not
//! delivered, non-delivery is logged and the owning mutation still
//! succeeds. There is no retry or queue.

/// The kind of event pushed to the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    ExpenseCreated,
    ReimbursementApproved,
    ReimbursementReverted,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExpenseCreated => "expense_created",
            Self::ReimbursementApproved => "reimbursement_approved",
            Self::ReimbursementReverted => "reimbursement_reverted",
        }
    }
}

/// Transport-agnostic dispatcher interface (socket, email, …).
pub trait NotificationPort: Send + Sync {
    /// Returns whether the event was delivered.
    fn notify(&self, user_id: &str, message: &str, event: EventKind) -> bool;
}

/// Default dispatcher: logs the event and reports it delivered.
///
/// Useful for deployments without a push transport and for tests.
#[derive(Debug, Default)]
pub struct LoggingDispatcher;

impl NotificationPort for LoggingDispatcher {
    fn notify(&self, user_id: &str, message: &str, event: EventKind) -> bool {
        tracing::info!(user_id, event = event.as_str(), "{message}");
        true
    }
}
