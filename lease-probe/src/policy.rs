//! Disposition policy: what the lease monitor does with a leased message.
//!
//! A policy is chosen once per session and never changes. On every tick the
//! monitor asks it for a [`TickAction`]; the three settling variants answer
//! `Settle` immediately, so their monitors end on the first tick. `LockExpire`
//! always answers `Hold` and additionally withdraws lock renewal once the
//! configured lock-renew duration has elapsed, so the lease lapses and the
//! broker redelivers the message.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use lease_queue::{LeaseToken, QueueClient, QueueResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hooks::ExceptionAction;
use crate::monitor::MonitorOutcome;

/// Reason attached when the fixed `DeadLetter` policy settles a message
pub const DEAD_LETTER_REASON: &str = "MessageHandling";
pub const DEAD_LETTER_DESCRIPTION: &str = "Message handling set to DeadLetter";

/// Reason and description used by the triggered handler for blank payloads
pub const EMPTY_PAYLOAD_REASON: &str = "Message content is empty.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispositionPolicy {
    Complete,
    Abandon,
    DeadLetter,
    LockExpire,
}

/// Settle call to make with the lease token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Complete,
    Abandon,
    DeadLetter { reason: String, description: String },
}

/// Per-tick decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickAction {
    Settle(Disposition),
    Hold,
}

/// Whether the lease may still be extended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renewal {
    Allowed,
    Suppressed,
}

impl DispositionPolicy {
    pub const ALL: [Self; 4] = [Self::Complete, Self::Abandon, Self::LockExpire, Self::DeadLetter];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Complete => "Complete",
            Self::Abandon => "Abandon",
            Self::DeadLetter => "DeadLetter",
            Self::LockExpire => "LockExpire",
        }
    }

    pub fn on_tick(&self) -> TickAction {
        match self {
            Self::Complete => TickAction::Settle(Disposition::Complete),
            Self::Abandon => TickAction::Settle(Disposition::Abandon),
            Self::DeadLetter => TickAction::Settle(Disposition::DeadLetter {
                reason: DEAD_LETTER_REASON.to_string(),
                description: DEAD_LETTER_DESCRIPTION.to_string(),
            }),
            Self::LockExpire => TickAction::Hold,
        }
    }

    /// Renewal verdict at `elapsed` time since delivery
    pub fn renewal(&self, elapsed: Duration, lock_renew: Duration) -> Renewal {
        match self {
            Self::LockExpire if elapsed >= lock_renew => Renewal::Suppressed,
            _ => Renewal::Allowed,
        }
    }

    /// Two-branch policy of the triggered handler: blank payloads are
    /// dead-lettered, everything else is completed.
    pub fn for_payload(body: &[u8]) -> Disposition {
        if String::from_utf8_lossy(body).trim().is_empty() {
            Disposition::DeadLetter {
                reason: EMPTY_PAYLOAD_REASON.to_string(),
                description: EMPTY_PAYLOAD_REASON.to_string(),
            }
        } else {
            Disposition::Complete
        }
    }
}

impl fmt::Display for DispositionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown message handling '{0}', expected one of Complete, Abandon, LockExpire, DeadLetter")]
pub struct ParsePolicyError(pub String);

impl FromStr for DispositionPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|policy| policy.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ParsePolicyError(s.to_string()))
    }
}

impl Disposition {
    /// Console line printed before the settle call
    pub fn announcement(&self) -> &'static str {
        match self {
            Self::Complete => {
                "Message handling set to Complete. Finishing message processing. Message getting removed from queue"
            }
            Self::Abandon => {
                "Message handling set to Abandon. Stopping message processing, putting back into queue with Deliver Count +1"
            }
            Self::DeadLetter { .. } => {
                "Message handling set to DeadLetter. Stopping message processing, message going to DeadLetter Queue"
            }
        }
    }

    pub fn action(&self) -> ExceptionAction {
        match self {
            Self::Complete => ExceptionAction::Complete,
            Self::Abandon => ExceptionAction::Abandon,
            Self::DeadLetter { .. } => ExceptionAction::DeadLetter,
        }
    }

    /// Monitor outcome once the settle call has succeeded
    pub fn outcome(&self) -> MonitorOutcome {
        match self {
            Self::Complete => MonitorOutcome::Completed,
            Self::Abandon => MonitorOutcome::Abandoned,
            Self::DeadLetter { .. } => MonitorOutcome::DeadLettered,
        }
    }

    /// Make the settle call
    pub async fn apply<C>(&self, client: &C, token: &LeaseToken) -> QueueResult<()>
    where
        C: QueueClient + ?Sized,
    {
        match self {
            Self::Complete => client.complete(token).await,
            Self::Abandon => client.abandon(token).await,
            Self::DeadLetter {
                reason,
                description,
            } => client.dead_letter(token, reason, description).await,
        }
    }
}
