use std::fmt;

use async_trait::async_trait;
use lease_queue::{MessageId, QueueError};
use tracing::error;

/// The queue operation that was running when an error surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionAction {
    Receive,
    Complete,
    Abandon,
    DeadLetter,
    RenewLock,
    /// The per-message handler itself
    Callback,
}

impl ExceptionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receive => "Receive",
            Self::Complete => "Complete",
            Self::Abandon => "Abandon",
            Self::DeadLetter => "DeadLetter",
            Self::RenewLock => "RenewLock",
            Self::Callback => "UserCallback",
        }
    }
}

impl fmt::Display for ExceptionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context handed to an [`ExceptionHandler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionReceived {
    pub error: QueueError,
    pub action: ExceptionAction,
    /// `None` for pipeline errors not tied to a delivered message
    pub message_id: Option<MessageId>,
}

impl ExceptionReceived {
    pub fn new(error: QueueError, action: ExceptionAction, message_id: Option<MessageId>) -> Self {
        Self {
            error,
            action,
            message_id,
        }
    }
}

/// Hook invoked for receive-pipeline and settle errors.
///
/// Errors reaching the hook are never fatal: the session keeps running and
/// the message's fate is left to the broker's redelivery rules.
#[async_trait]
pub trait ExceptionHandler: Send + Sync {
    async fn exception_received(&self, event: &ExceptionReceived);
}

/// Default hook: log and carry on
#[derive(Debug, Clone, Copy, Default)]
pub struct LogExceptions;

#[async_trait]
impl ExceptionHandler for LogExceptions {
    async fn exception_received(&self, event: &ExceptionReceived) {
        match &event.message_id {
            Some(message_id) => error!(
                action = %event.action,
                message_id = %message_id,
                "Message handler encountered an exception {}.",
                event.error
            ),
            None => error!(
                action = %event.action,
                "Message handler encountered an exception {}.",
                event.error
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn log_exceptions_reports_action_and_error() {
        let event = ExceptionReceived::new(
            QueueError::LockLost("token-1".into()),
            ExceptionAction::Complete,
            Some(MessageId::from("m-1")),
        );

        LogExceptions.exception_received(&event).await;

        assert!(logs_contain("Message handler encountered an exception Lock lost for lease token token-1."));
        assert!(logs_contain("action=Complete"));
    }
}
