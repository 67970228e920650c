//! Operator-facing notifications raised by the delivery engine.

use tracing::{error, warn};

/// Message shown when a batch is discarded while the collector is unreachable.
pub const COLLECTOR_UNAVAILABLE_MESSAGE: &str = "Server is unavailable. Please try again later.";

/// Message shown when a batch is discarded without internet connectivity.
pub const NO_INTERNET_MESSAGE: &str = "No internet connection. Collected data could not be sent.";

/// Where delivery failures are surfaced to the user.
pub trait NotificationSink: Send + Sync {
    /// A batch exhausted every attempt and was discarded.
    ///
    /// Called at most once per discarded batch.
    fn notify_terminal_failure(&self, message: &str);

    /// The external connectivity probe failed during a health check.
    ///
    /// Advisory only; the batch is still being retried.
    fn notify_no_internet(&self, message: &str) {
        warn!(message = %message, "Connectivity advisory");
    }
}

/// Sink that reports through the tracing pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify_terminal_failure(&self, message: &str) {
        error!(message = %message, "Batch delivery failed permanently");
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_distinct() {
        assert_ne!(COLLECTOR_UNAVAILABLE_MESSAGE, NO_INTERNET_MESSAGE);
    }

    #[test]
    fn test_log_notifier_accepts_both_calls() {
        let sink = LogNotifier;
        sink.notify_terminal_failure(COLLECTOR_UNAVAILABLE_MESSAGE);
        sink.notify_no_internet(NO_INTERNET_MESSAGE);
    }
}
