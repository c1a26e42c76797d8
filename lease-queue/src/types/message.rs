use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::MessageId;

/// Outgoing message - immutable submission data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Producer-generated identifier
    pub message_id: MessageId,

    /// Opaque payload bytes
    pub body: Vec<u8>,

    /// Time-to-live; the broker default applies when unset
    pub time_to_live: Option<Duration>,
}

impl OutgoingMessage {
    /// Create a new message with the given id and body
    pub fn new(message_id: MessageId, body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id,
            body: body.into(),
            time_to_live: None,
        }
    }

    /// Set the time-to-live
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Get the payload size in bytes
    pub fn body_size(&self) -> usize {
        self.body.len()
    }
}
