use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LeaseToken, MessageId, OutgoingMessage};

/// How a receiver takes messages off the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiveMode {
    /// Messages are leased and must be settled by the holder
    PeekLock,

    /// Messages are removed from the queue as they are delivered
    ReceiveAndDelete,
}

/// Broker-side message lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageState {
    /// Available for the next receiver
    Active,

    /// Leased to one consumer until the deadline
    Locked { locked_until: DateTime<Utc> },

    /// Moved to the error sub-queue
    DeadLettered { reason: String, description: String },
}

impl MessageState {
    /// Get the state name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Locked { .. } => "locked",
            Self::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// Message record - mutable runtime state owned by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: MessageId,
    pub body: Vec<u8>,
    pub sequence_number: u64,
    pub enqueued_at: DateTime<Utc>,
    pub time_to_live: Duration,
    pub state: MessageState,

    /// Number of leases handed out so far
    pub delivery_count: u32,

    pub lease_token: Option<LeaseToken>,
}

impl MessageRecord {
    /// Create a new active record from an outgoing message
    pub fn new(
        message: OutgoingMessage,
        sequence_number: u64,
        enqueued_at: DateTime<Utc>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            message_id: message.message_id,
            body: message.body,
            sequence_number,
            enqueued_at,
            time_to_live: message.time_to_live.unwrap_or(default_ttl),
            state: MessageState::Active,
            delivery_count: 0,
            lease_token: None,
        }
    }

    /// When the message stops being deliverable
    pub fn expires_at(&self) -> DateTime<Utc> {
        match chrono::Duration::from_std(self.time_to_live) {
            Ok(ttl) => self
                .enqueued_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Err(_) => DateTime::<Utc>::MAX_UTC,
        }
    }

    /// Check if the time-to-live has elapsed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }

    /// Current lease deadline, if locked
    pub fn locked_until(&self) -> Option<DateTime<Utc>> {
        match self.state {
            MessageState::Locked { locked_until } => Some(locked_until),
            _ => None,
        }
    }

    /// Check if the current lock has lapsed
    pub fn lock_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until(), Some(locked_until) if locked_until <= now)
    }

    /// Hand out a new lease
    pub fn lock(&mut self, lease_token: LeaseToken, locked_until: DateTime<Utc>) {
        self.delivery_count += 1;
        self.state = MessageState::Locked { locked_until };
        self.lease_token = Some(lease_token);
    }

    /// Return the message to the active queue
    pub fn release(&mut self) {
        self.state = MessageState::Active;
        self.lease_token = None;
    }

    /// Move the message to the error sub-queue
    pub fn dead_letter(&mut self, reason: impl Into<String>, description: impl Into<String>) {
        self.state = MessageState::DeadLettered {
            reason: reason.into(),
            description: description.into(),
        };
        self.lease_token = None;
    }

    /// Snapshot handed to a consumer
    pub fn to_received(&self) -> ReceivedMessage {
        ReceivedMessage {
            message_id: self.message_id.clone(),
            body: self.body.clone(),
            sequence_number: self.sequence_number,
            enqueued_at: self.enqueued_at,
            delivery_count: self.delivery_count,
            time_to_live: self.time_to_live,
            expires_at: self.expires_at(),
            locked_until: self.locked_until(),
            lease_token: self.lease_token.clone(),
        }
    }
}

/// A message as delivered to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Vec<u8>,
    pub sequence_number: u64,
    pub enqueued_at: DateTime<Utc>,
    pub delivery_count: u32,
    pub time_to_live: Duration,
    pub expires_at: DateTime<Utc>,

    /// Lease deadline as of delivery; `None` in receive-and-delete mode
    pub locked_until: Option<DateTime<Utc>>,

    /// Token required to settle or renew; `None` in receive-and-delete mode
    pub lease_token: Option<LeaseToken>,
}

impl ReceivedMessage {
    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Check if the lease is still valid
    pub fn lease_valid(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(locked_until) if locked_until > now)
    }
}
