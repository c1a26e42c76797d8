//! # Lease monitor
//!
//! Watches one leased message until its lease ends, printing a countdown row
//! per tick and consulting the session's [`DispositionPolicy`].
//!
//! Each tick:
//!
//! 1. compute `remaining = locked_until - now` and emit a [`LeaseRow`]
//! 2. `remaining <= 0` ends the monitor with [`MonitorOutcome::Expired`]
//! 3. a `Settle` decision makes exactly one settle call, bounded by the
//!    settle timeout, and ends the monitor either way
//! 4. a `Hold` decision waits one tick (or until shutdown), then renews the
//!    lock if the policy still allows it and the deadline is closer than two
//!    ticks; once renewal is suppressed the expiry note is printed once
//!
//! The monitor never retries a failed settle call. Failures are handed to the
//! [`ExceptionHandler`] and the broker's redelivery rules decide what happens
//! to the message next.
//!
//! [`DispositionPolicy`]: crate::policy::DispositionPolicy

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lease_queue::clock::{elapsed_between, to_chrono};
use lease_queue::{wait_for_shutdown, Clock, LeaseToken, MessageId, QueueClient, QueueError, ReceivedMessage};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::hooks::{ExceptionAction, ExceptionHandler, ExceptionReceived, LogExceptions};
use crate::output::{ConsoleSink, TraceSink};
use crate::policy::{Disposition, Renewal, TickAction};
use crate::session::SessionConfig;

pub const EXPIRY_NOTE: &str = "Letting message lock expire.";

/// How a monitor ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    Completed,
    Abandoned,
    DeadLettered,
    /// The lease deadline passed while the message was held
    Expired,
    /// The settle call failed or timed out; it is not retried
    SettleFailed(QueueError),
    /// Shutdown was requested while holding the message
    Cancelled,
    /// The message was delivered without a lease token
    NotLeased,
}

impl MonitorOutcome {
    /// Whether a settle call succeeded
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned | Self::DeadLettered)
    }
}

/// Summary of one monitored delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub message_id: MessageId,
    pub outcome: MonitorOutcome,
    pub ticks: u32,
    /// Tick on which the expiry note was printed
    pub expiry_noted_on_tick: Option<u32>,
    pub renewals: u32,
}

/// One diagnostic row
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseRow {
    pub tick: u32,
    pub elapsed: Duration,
    pub locked_until: DateTime<Utc>,
    pub now: DateTime<Utc>,
    /// Signed: negative once the deadline has passed
    pub remaining: chrono::Duration,
    pub expires_at: DateTime<Utc>,
    pub ttl_minutes: f64,
    pub delivery_count: u32,
}

impl LeaseRow {
    pub fn remaining_secs(&self) -> f64 {
        self.remaining.num_milliseconds() as f64 / 1000.0
    }
}

/// Per-delivery monitor state
#[derive(Debug, Clone)]
pub struct MonitorState {
    pub started_at: DateTime<Utc>,
    pub tick: u32,
    pub expiry_noted: bool,
    pub expiry_noted_on_tick: Option<u32>,
    pub renewals: u32,
    pub locked_until: DateTime<Utc>,
}

impl MonitorState {
    pub fn new(started_at: DateTime<Utc>, locked_until: DateTime<Utc>) -> Self {
        Self {
            started_at,
            tick: 0,
            expiry_noted: false,
            expiry_noted_on_tick: None,
            renewals: 0,
            locked_until,
        }
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        elapsed_between(self.started_at, now)
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.locked_until - now
    }

    pub fn row(&self, message: &ReceivedMessage, now: DateTime<Utc>) -> LeaseRow {
        LeaseRow {
            tick: self.tick,
            elapsed: self.elapsed(now),
            locked_until: self.locked_until,
            now,
            remaining: self.remaining(now),
            expires_at: message.expires_at,
            ttl_minutes: message.time_to_live.as_secs_f64() / 60.0,
            delivery_count: message.delivery_count,
        }
    }

    /// Record the one-time expiry note; returns `false` if already noted
    fn note_expiry(&mut self) -> bool {
        if self.expiry_noted {
            return false;
        }
        self.expiry_noted = true;
        self.expiry_noted_on_tick = Some(self.tick);
        true
    }
}

/// Monitors leased messages for one session
#[derive(Clone)]
pub struct LeaseMonitor {
    client: Arc<dyn QueueClient>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    sink: Arc<dyn TraceSink>,
    exceptions: Arc<dyn ExceptionHandler>,
}

impl LeaseMonitor {
    pub fn new(client: Arc<dyn QueueClient>, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        Self {
            client,
            clock,
            config,
            sink: Arc::new(ConsoleSink),
            exceptions: Arc::new(LogExceptions),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_exception_handler(mut self, exceptions: Arc<dyn ExceptionHandler>) -> Self {
        self.exceptions = exceptions;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Hold `message` until its lease ends one way or another
    pub async fn run(&self, message: &ReceivedMessage, mut shutdown: watch::Receiver<bool>) -> MonitorReport {
        self.sink.message_received(message);

        let (Some(token), Some(locked_until)) = (message.lease_token.clone(), message.locked_until) else {
            warn!("Message {} was delivered without a lease", message.message_id);
            return MonitorReport {
                message_id: message.message_id.clone(),
                outcome: MonitorOutcome::NotLeased,
                ticks: 0,
                expiry_noted_on_tick: None,
                renewals: 0,
            };
        };

        let mut state = MonitorState::new(self.clock.now(), locked_until);
        let policy = self.config.policy;

        let outcome = loop {
            state.tick += 1;
            let row = state.row(message, self.clock.now());
            self.sink.row(&row);

            if row.remaining <= chrono::Duration::zero() {
                info!("Lease on message {} expired after {} ticks", message.message_id, state.tick);
                break MonitorOutcome::Expired;
            }

            if let TickAction::Settle(disposition) = policy.on_tick() {
                break self.settle(message, &token, disposition).await;
            }

            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break MonitorOutcome::Cancelled,
                _ = self.clock.sleep(self.config.tick_period) => {}
            }

            let now = self.clock.now();
            match policy.renewal(state.elapsed(now), self.config.lock_renew) {
                Renewal::Allowed => {
                    if state.remaining(now) < to_chrono(self.config.tick_period * 2) {
                        self.renew(message, &token, &mut state).await;
                    }
                }
                Renewal::Suppressed => {
                    if state.note_expiry() {
                        self.sink.note(EXPIRY_NOTE);
                    }
                }
            }
        };

        debug!("Monitor for message {} finished: {:?}", message.message_id, outcome);

        MonitorReport {
            message_id: message.message_id.clone(),
            outcome,
            ticks: state.tick,
            expiry_noted_on_tick: state.expiry_noted_on_tick,
            renewals: state.renewals,
        }
    }

    async fn settle(&self, message: &ReceivedMessage, token: &LeaseToken, disposition: Disposition) -> MonitorOutcome {
        self.sink.note(disposition.announcement());

        let timeout = self.config.settle_timeout;
        let result = match tokio::time::timeout(timeout, disposition.apply(self.client.as_ref(), token)).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Timeout(timeout)),
        };

        match result {
            Ok(()) => {
                info!("Message {} settled: {:?}", message.message_id, disposition.action());
                disposition.outcome()
            }
            Err(error) => {
                self.report(error.clone(), disposition.action(), message).await;
                MonitorOutcome::SettleFailed(error)
            }
        }
    }

    async fn renew(&self, message: &ReceivedMessage, token: &LeaseToken, state: &mut MonitorState) {
        let timeout = self.config.settle_timeout;
        let result = match tokio::time::timeout(timeout, self.client.renew_lock(token)).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Timeout(timeout)),
        };

        match result {
            Ok(locked_until) => {
                debug!("Renewed lock on message {} until {}", message.message_id, locked_until);
                state.locked_until = locked_until;
                state.renewals += 1;
            }
            Err(error) => self.report(error, ExceptionAction::RenewLock, message).await,
        }
    }

    async fn report(&self, error: QueueError, action: ExceptionAction, message: &ReceivedMessage) {
        let event = ExceptionReceived::new(error, action, Some(message.message_id.clone()));
        self.exceptions.exception_received(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lease_queue::backend::memory::MemoryBroker;
    use lease_queue::{ManualClock, MessageId, OutgoingMessage, ReceiveMode};
    use crate::output::MemorySink;
    use crate::policy::DispositionPolicy;

    async fn leased(broker: &MemoryBroker) -> ReceivedMessage {
        broker.send(OutgoingMessage::new(MessageId::new(), "payload")).await.unwrap();
        broker.receive(ReceiveMode::PeekLock).await.unwrap().unwrap()
    }

    fn monitor(broker: &MemoryBroker, clock: &ManualClock, config: SessionConfig) -> (LeaseMonitor, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let monitor = LeaseMonitor::new(Arc::new(broker.clone()), Arc::new(clock.clone()), config)
            .with_sink(sink.clone());
        (monitor, sink)
    }

    #[tokio::test]
    async fn first_row_uses_the_real_deadline() {
        let clock = ManualClock::default();
        let broker = MemoryBroker::new().with_clock(Arc::new(clock.clone()));
        let message = leased(&broker).await;
        let (monitor, sink) = monitor(&broker, &clock, SessionConfig::new(DispositionPolicy::Complete, Duration::from_secs(60)));

        let (_tx, rx) = watch::channel(false);
        monitor.run(&message, rx).await;

        let rows = sink.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tick, 1);
        assert_eq!(rows[0].remaining, chrono::Duration::seconds(60));
        assert_eq!(rows[0].elapsed, Duration::ZERO);
        assert_eq!(rows[0].delivery_count, 1);
    }

    #[tokio::test]
    async fn unleased_delivery_is_reported_without_ticks() {
        let clock = ManualClock::default();
        let broker = MemoryBroker::new().with_clock(Arc::new(clock.clone()));
        broker.send(OutgoingMessage::new(MessageId::new(), "payload")).await.unwrap();
        let message = broker.receive(ReceiveMode::ReceiveAndDelete).await.unwrap().unwrap();
        let (monitor, sink) = monitor(&broker, &clock, SessionConfig::default());

        let (_tx, rx) = watch::channel(false);
        let report = monitor.run(&message, rx).await;

        assert_eq!(report.outcome, MonitorOutcome::NotLeased);
        assert_eq!(report.ticks, 0);
        assert!(sink.rows().is_empty());
    }

    #[test]
    fn expiry_is_noted_once() {
        let now = Utc::now();
        let mut state = MonitorState::new(now, now);
        state.tick = 3;
        assert!(state.note_expiry());
        state.tick = 4;
        assert!(!state.note_expiry());
        assert_eq!(state.expiry_noted_on_tick, Some(3));
    }
}
