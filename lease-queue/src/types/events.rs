use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

/// Broker event protocol for observing the lease lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueEvent {
    Sent {
        message_id: MessageId,
        sequence_number: u64,
        at: DateTime<Utc>,
    },

    Locked {
        message_id: MessageId,
        delivery_count: u32,
        locked_until: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    LockRenewed {
        message_id: MessageId,
        locked_until: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    Completed {
        message_id: MessageId,
        at: DateTime<Utc>,
    },

    Abandoned {
        message_id: MessageId,
        delivery_count: u32,
        at: DateTime<Utc>,
    },

    DeadLettered {
        message_id: MessageId,
        reason: String,
        at: DateTime<Utc>,
    },

    /// The lease lapsed and the broker reclaimed the message
    LockExpired {
        message_id: MessageId,
        delivery_count: u32,
        at: DateTime<Utc>,
    },

    /// Time-to-live elapsed before the message was consumed
    Expired {
        message_id: MessageId,
        at: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Sent { .. } => "sent",
            Self::Locked { .. } => "locked",
            Self::LockRenewed { .. } => "lock_renewed",
            Self::Completed { .. } => "completed",
            Self::Abandoned { .. } => "abandoned",
            Self::DeadLettered { .. } => "dead_lettered",
            Self::LockExpired { .. } => "lock_expired",
            Self::Expired { .. } => "expired",
        }
    }

    /// Get the message ID from any event
    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::Sent { message_id, .. }
            | Self::Locked { message_id, .. }
            | Self::LockRenewed { message_id, .. }
            | Self::Completed { message_id, .. }
            | Self::Abandoned { message_id, .. }
            | Self::DeadLettered { message_id, .. }
            | Self::LockExpired { message_id, .. }
            | Self::Expired { message_id, .. } => message_id,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Sent { at, .. }
            | Self::Locked { at, .. }
            | Self::LockRenewed { at, .. }
            | Self::Completed { at, .. }
            | Self::Abandoned { at, .. }
            | Self::DeadLettered { at, .. }
            | Self::LockExpired { at, .. }
            | Self::Expired { at, .. } => at,
        }
    }
}
