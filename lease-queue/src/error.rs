use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors surfaced by a queue client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The lease token is unknown, already used, or its lock expired
    #[error("Lock lost for lease token {0}")]
    LockLost(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Message size exceeded: {size} bytes (max: {max})")]
    MessageSizeExceeded { size: usize, max: usize },

    #[error("Duplicate message id: {0}")]
    DuplicateMessage(String),

    /// Settlement was requested for a message received without a lease
    #[error("Message {0} was not received in peek-lock mode")]
    NotLeased(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Receiver closed")]
    ReceiverClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Whether the error means the caller no longer holds the lease
    pub fn is_lock_lost(&self) -> bool {
        matches!(self, Self::LockLost(_))
    }

    /// Transport and timeout failures are worth reporting but not fatal to a receiver
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}
