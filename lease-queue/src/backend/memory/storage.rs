use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    QueueResult, QueueError, MessageId, MessageRecord, MessageState, OutgoingMessage,
    ReceivedMessage, ReceiveMode, QueueEvent,
    backend::{QueueClient, BoxStream},
    clock::{Clock, SystemClock, to_chrono},
    types::LeaseToken
};

/// Dead-letter reason used when a message runs out of delivery attempts
pub const MAX_DELIVERY_COUNT_EXCEEDED: &str = "MaxDeliveryCountExceeded";

/// Dead-letter reason used when a message outlives its time-to-live
pub const TTL_EXPIRED: &str = "TTLExpiredException";

/// Broker tuning, mirroring the per-queue settings of hosted brokers
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How long one lease lasts before it must be renewed or settled
    pub lock_duration: Duration,
    /// Deliveries allowed before the message is dead-lettered
    pub max_delivery_count: u32,
    /// Time-to-live applied when a message does not carry one
    pub default_ttl: Duration,
    /// Route TTL-expired messages to the error sub-queue instead of dropping them
    pub dead_letter_on_expiration: bool,
    /// Largest accepted body
    pub max_message_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(60),
            max_delivery_count: 10,
            default_ttl: Duration::from_secs(14 * 24 * 60 * 60),
            dead_letter_on_expiration: false,
            max_message_size: 256 * 1024,
        }
    }
}

/// Mutable queue contents guarded by a single lock
#[derive(Default)]
pub(crate) struct BrokerState {
    /// Messages still owned by the queue (active or locked)
    records: HashMap<MessageId, MessageRecord>,
    /// Active messages in sequence order
    active: BTreeMap<u64, MessageId>,
    /// Outstanding leases
    leases: HashMap<LeaseToken, MessageId>,
    /// Error sub-queue
    dead_letters: Vec<MessageRecord>,
    next_sequence: u64,
}

/// In-memory peek-lock broker for tests and single-process demos
#[derive(Clone)]
pub struct MemoryBroker {
    pub(crate) state: Arc<RwLock<BrokerState>>,
    pub(crate) config: BrokerConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) event_broadcaster: broadcast::Sender<QueueEvent>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    pub fn with_config(config: BrokerConfig) -> Self {
        let (event_broadcaster, _) = broadcast::channel(1000);

        Self {
            state: Arc::new(RwLock::new(BrokerState::default())),
            config,
            clock: Arc::new(SystemClock),
            event_broadcaster,
        }
    }

    /// Use a different time source for lease deadlines
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Subscribe to raw broker events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_broadcaster.subscribe()
    }

    /// Messages available for delivery
    pub fn active_count(&self) -> usize {
        self.state.read().active.len()
    }

    /// Messages currently under lease
    pub fn locked_count(&self) -> usize {
        self.state.read().leases.len()
    }

    /// Snapshot of the error sub-queue
    pub fn dead_letters(&self) -> Vec<MessageRecord> {
        self.state.read().dead_letters.clone()
    }

    /// Current record of a message still owned by the queue
    pub fn record(&self, message_id: &MessageId) -> Option<MessageRecord> {
        self.state.read().records.get(message_id).cloned()
    }

    /// Return every lapsed lease to the queue. Returns how many were reclaimed.
    pub fn reclaim_expired_locks(&self) -> usize {
        let now = self.clock.now();
        let mut events = Vec::new();
        let reclaimed = {
            let mut state = self.state.write();
            self.reclaim_locked(&mut state, now, &mut events)
        };
        self.emit_all(events);
        reclaimed
    }

    /// Force a lease to lapse (test helper)
    pub fn force_lock_expiry(&self, message_id: &MessageId) {
        let mut state = self.state.write();
        if let Some(record) = state.records.get_mut(message_id) {
            if let MessageState::Locked { ref mut locked_until } = record.state {
                *locked_until = self.clock.now() - chrono::Duration::seconds(1);
            }
        }
    }

    fn with_state<T>(
        &self,
        op: impl FnOnce(&mut BrokerState, DateTime<Utc>, &mut Vec<QueueEvent>) -> QueueResult<T>,
    ) -> QueueResult<T> {
        let now = self.clock.now();
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.write();
            op(&mut state, now, &mut events)
        };
        self.emit_all(events);
        result
    }

    fn emit_all(&self, events: Vec<QueueEvent>) {
        for event in events {
            let _ = self.event_broadcaster.send(event);
        }
    }

    fn reclaim_locked(
        &self,
        state: &mut BrokerState,
        now: DateTime<Utc>,
        events: &mut Vec<QueueEvent>,
    ) -> usize {
        let lapsed: Vec<MessageId> = state
            .records
            .values()
            .filter(|record| record.lock_expired(now))
            .map(|record| record.message_id.clone())
            .collect();

        for message_id in &lapsed {
            debug!("Reclaiming lapsed lease for message: {}", message_id);
            self.release(state, message_id, now, events, true);
        }

        lapsed.len()
    }

    /// End the current lease and put the message back, or dead-letter it when
    /// it has used up its deliveries.
    fn release(
        &self,
        state: &mut BrokerState,
        message_id: &MessageId,
        now: DateTime<Utc>,
        events: &mut Vec<QueueEvent>,
        lapsed: bool,
    ) {
        let Some(mut record) = state.records.remove(message_id) else {
            return;
        };
        if let Some(token) = record.lease_token.take() {
            state.leases.remove(&token);
        }

        let delivery_count = record.delivery_count;
        events.push(if lapsed {
            QueueEvent::LockExpired { message_id: message_id.clone(), delivery_count, at: now }
        } else {
            QueueEvent::Abandoned { message_id: message_id.clone(), delivery_count, at: now }
        });

        if delivery_count >= self.config.max_delivery_count {
            let description = format!(
                "Message could not be consumed after {} delivery attempts.",
                delivery_count
            );
            info!("Dead-lettering message {}: {}", message_id, description);
            record.dead_letter(MAX_DELIVERY_COUNT_EXCEEDED, description);
            events.push(QueueEvent::DeadLettered {
                message_id: message_id.clone(),
                reason: MAX_DELIVERY_COUNT_EXCEEDED.to_string(),
                at: now,
            });
            state.dead_letters.push(record);
        } else {
            record.release();
            state.active.insert(record.sequence_number, message_id.clone());
            state.records.insert(message_id.clone(), record);
        }
    }

    /// Resolve a lease token to its message, reclaiming the message if the
    /// lease has already lapsed.
    fn validate_lease(
        &self,
        state: &mut BrokerState,
        token: &LeaseToken,
        now: DateTime<Utc>,
        events: &mut Vec<QueueEvent>,
    ) -> QueueResult<MessageId> {
        let message_id = state
            .leases
            .get(token)
            .cloned()
            .ok_or_else(|| QueueError::LockLost(token.to_string()))?;

        let lapsed = state
            .records
            .get(&message_id)
            .map(|record| record.lock_expired(now))
            .unwrap_or(true);

        if lapsed {
            self.release(state, &message_id, now, events, true);
            return Err(QueueError::LockLost(token.to_string()));
        }

        Ok(message_id)
    }

    /// Drop (or dead-letter) a message whose time-to-live has elapsed
    fn expire(
        &self,
        state: &mut BrokerState,
        mut record: MessageRecord,
        now: DateTime<Utc>,
        events: &mut Vec<QueueEvent>,
    ) {
        events.push(QueueEvent::Expired { message_id: record.message_id.clone(), at: now });
        if self.config.dead_letter_on_expiration {
            record.dead_letter(TTL_EXPIRED, "The message expired and was dead lettered.");
            events.push(QueueEvent::DeadLettered {
                message_id: record.message_id.clone(),
                reason: TTL_EXPIRED.to_string(),
                at: now,
            });
            state.dead_letters.push(record);
        }
    }
}

#[async_trait]
impl QueueClient for MemoryBroker {
    async fn send(&self, message: OutgoingMessage) -> QueueResult<MessageId> {
        let size = message.body_size();
        if size > self.config.max_message_size {
            return Err(QueueError::MessageSizeExceeded {
                size,
                max: self.config.max_message_size,
            });
        }

        self.with_state(|state, now, events| {
            if state.records.contains_key(&message.message_id) {
                return Err(QueueError::DuplicateMessage(message.message_id.to_string()));
            }

            state.next_sequence += 1;
            let sequence_number = state.next_sequence;
            let record = MessageRecord::new(message, sequence_number, now, self.config.default_ttl);
            let message_id = record.message_id.clone();

            state.active.insert(sequence_number, message_id.clone());
            state.records.insert(message_id.clone(), record);

            events.push(QueueEvent::Sent {
                message_id: message_id.clone(),
                sequence_number,
                at: now,
            });
            Ok(message_id)
        })
    }

    async fn receive(&self, mode: ReceiveMode) -> QueueResult<Option<ReceivedMessage>> {
        self.with_state(|state, now, events| {
            self.reclaim_locked(state, now, events);

            while let Some((_, message_id)) = state.active.pop_first() {
                let Some(mut record) = state.records.remove(&message_id) else {
                    continue;
                };

                if record.is_expired(now) {
                    self.expire(state, record, now, events);
                    continue;
                }

                match mode {
                    ReceiveMode::PeekLock => {
                        let token = LeaseToken::new();
                        let locked_until = now + to_chrono(self.config.lock_duration);
                        record.lock(token.clone(), locked_until);

                        events.push(QueueEvent::Locked {
                            message_id: message_id.clone(),
                            delivery_count: record.delivery_count,
                            locked_until,
                            at: now,
                        });

                        let received = record.to_received();
                        state.leases.insert(token, message_id.clone());
                        state.records.insert(message_id, record);
                        return Ok(Some(received));
                    }
                    ReceiveMode::ReceiveAndDelete => {
                        record.delivery_count += 1;
                        events.push(QueueEvent::Completed { message_id, at: now });
                        return Ok(Some(record.to_received()));
                    }
                }
            }

            Ok(None)
        })
    }

    async fn complete(&self, token: &LeaseToken) -> QueueResult<()> {
        self.with_state(|state, now, events| {
            let message_id = self.validate_lease(state, token, now, events)?;
            state.leases.remove(token);
            state.records.remove(&message_id);

            events.push(QueueEvent::Completed { message_id, at: now });
            Ok(())
        })
    }

    async fn abandon(&self, token: &LeaseToken) -> QueueResult<()> {
        self.with_state(|state, now, events| {
            let message_id = self.validate_lease(state, token, now, events)?;
            self.release(state, &message_id, now, events, false);
            Ok(())
        })
    }

    async fn dead_letter(
        &self,
        token: &LeaseToken,
        reason: &str,
        description: &str,
    ) -> QueueResult<()> {
        self.with_state(|state, now, events| {
            let message_id = self.validate_lease(state, token, now, events)?;
            state.leases.remove(token);
            let mut record = state
                .records
                .remove(&message_id)
                .ok_or_else(|| QueueError::MessageNotFound(message_id.to_string()))?;

            record.dead_letter(reason, description);
            state.dead_letters.push(record);

            events.push(QueueEvent::DeadLettered {
                message_id,
                reason: reason.to_string(),
                at: now,
            });
            Ok(())
        })
    }

    async fn renew_lock(&self, token: &LeaseToken) -> QueueResult<DateTime<Utc>> {
        self.with_state(|state, now, events| {
            let message_id = self.validate_lease(state, token, now, events)?;
            let record = state
                .records
                .get_mut(&message_id)
                .ok_or_else(|| QueueError::MessageNotFound(message_id.to_string()))?;

            let locked_until = now + to_chrono(self.config.lock_duration);
            record.state = MessageState::Locked { locked_until };

            events.push(QueueEvent::LockRenewed { message_id, locked_until, at: now });
            Ok(locked_until)
        })
    }

    fn event_stream(&self) -> BoxStream<QueueEvent> {
        let receiver = self.event_broadcaster.subscribe();
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let stream = BroadcastStream::new(receiver)
            .filter_map(|result| result.ok());

        Box::pin(stream)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}
