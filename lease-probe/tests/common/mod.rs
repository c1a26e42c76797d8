#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use lease_probe::{ExceptionHandler, ExceptionReceived};
use lease_queue::backend::memory::{BrokerConfig, MemoryBroker};
use lease_queue::{
    BoxStream, LeaseToken, ManualClock, MessageId, OutgoingMessage, QueueClient, QueueError,
    QueueEvent, QueueResult, ReceiveMode, ReceivedMessage,
};

/// Broker plus the virtual clock it runs on
pub fn broker(config: BrokerConfig) -> (MemoryBroker, ManualClock) {
    let clock = ManualClock::default();
    let broker = MemoryBroker::with_config(config).with_clock(Arc::new(clock.clone()));
    (broker, clock)
}

pub fn lock_duration(secs: u64) -> BrokerConfig {
    BrokerConfig {
        lock_duration: Duration::from_secs(secs),
        ..BrokerConfig::default()
    }
}

pub async fn send_and_lease(broker: &MemoryBroker, body: &str) -> ReceivedMessage {
    broker.send(OutgoingMessage::new(MessageId::new(), body)).await.unwrap();
    broker.receive(ReceiveMode::PeekLock).await.unwrap().unwrap()
}

/// Which calls a [`CountingClient`] should fail
#[derive(Debug, Default, Clone)]
pub struct Faults {
    /// Fail the nth send (1-based)
    pub fail_send_at: Option<u32>,
    /// Fail this many receives before delegating
    pub failing_receives: u32,
    pub fail_settle: Option<QueueError>,
    /// Settle calls never return
    pub hang_settle: bool,
    pub fail_renew: bool,
}

/// Wraps a broker, counting every call and injecting faults
pub struct CountingClient {
    inner: MemoryBroker,
    faults: Faults,
    pub sends: AtomicU32,
    pub receives: AtomicUsize,
    pub completes: AtomicUsize,
    pub abandons: AtomicUsize,
    pub dead_letters: AtomicUsize,
    pub renewals: AtomicUsize,
    pub settled_tokens: Mutex<Vec<LeaseToken>>,
}

impl CountingClient {
    pub fn new(inner: MemoryBroker) -> Self {
        Self::with_faults(inner, Faults::default())
    }

    pub fn with_faults(inner: MemoryBroker, faults: Faults) -> Self {
        Self {
            inner,
            faults,
            sends: AtomicU32::new(0),
            receives: AtomicUsize::new(0),
            completes: AtomicUsize::new(0),
            abandons: AtomicUsize::new(0),
            dead_letters: AtomicUsize::new(0),
            renewals: AtomicUsize::new(0),
            settled_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn broker(&self) -> &MemoryBroker {
        &self.inner
    }

    /// (complete, abandon, dead_letter) call counts
    pub fn settle_calls(&self) -> (usize, usize, usize) {
        (
            self.completes.load(Ordering::SeqCst),
            self.abandons.load(Ordering::SeqCst),
            self.dead_letters.load(Ordering::SeqCst),
        )
    }

    async fn before_settle(&self, token: &LeaseToken) -> QueueResult<()> {
        self.settled_tokens.lock().push(token.clone());
        if self.faults.hang_settle {
            std::future::pending::<()>().await;
        }
        match &self.faults.fail_settle {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl QueueClient for CountingClient {
    async fn send(&self, message: OutgoingMessage) -> QueueResult<MessageId> {
        let n = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        if self.faults.fail_send_at == Some(n) {
            return Err(QueueError::Transport("connection refused".into()));
        }
        self.inner.send(message).await
    }

    async fn receive(&self, mode: ReceiveMode) -> QueueResult<Option<ReceivedMessage>> {
        let n = self.receives.fetch_add(1, Ordering::SeqCst) as u32;
        if n < self.faults.failing_receives {
            return Err(QueueError::Transport("link detached".into()));
        }
        self.inner.receive(mode).await
    }

    async fn complete(&self, token: &LeaseToken) -> QueueResult<()> {
        self.completes.fetch_add(1, Ordering::SeqCst);
        self.before_settle(token).await?;
        self.inner.complete(token).await
    }

    async fn abandon(&self, token: &LeaseToken) -> QueueResult<()> {
        self.abandons.fetch_add(1, Ordering::SeqCst);
        self.before_settle(token).await?;
        self.inner.abandon(token).await
    }

    async fn dead_letter(&self, token: &LeaseToken, reason: &str, description: &str) -> QueueResult<()> {
        self.dead_letters.fetch_add(1, Ordering::SeqCst);
        self.before_settle(token).await?;
        self.inner.dead_letter(token, reason, description).await
    }

    async fn renew_lock(&self, token: &LeaseToken) -> QueueResult<DateTime<Utc>> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_renew {
            return Err(QueueError::Transport("renew rejected".into()));
        }
        self.inner.renew_lock(token).await
    }

    fn event_stream(&self) -> BoxStream<QueueEvent> {
        self.inner.event_stream()
    }
}

/// Exception hook that remembers what it saw
#[derive(Default)]
pub struct RecordingExceptions {
    events: Mutex<Vec<ExceptionReceived>>,
}

impl RecordingExceptions {
    pub fn events(&self) -> Vec<ExceptionReceived> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl ExceptionHandler for RecordingExceptions {
    async fn exception_received(&self, event: &ExceptionReceived) {
        self.events.lock().push(event.clone());
    }
}
