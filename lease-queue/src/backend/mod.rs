#[cfg(feature = "memory")]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use std::pin::Pin;
use std::sync::Arc;

use crate::{
    QueueResult, MessageId, OutgoingMessage, ReceivedMessage, ReceiveMode,
    QueueEvent, types::LeaseToken
};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Client-side contract of a peek-lock queue
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Submit one message
    async fn send(&self, message: OutgoingMessage) -> QueueResult<MessageId>;

    /// Take the next available message, if any.
    /// In peek-lock mode the message comes back leased with a token.
    async fn receive(&self, mode: ReceiveMode) -> QueueResult<Option<ReceivedMessage>>;

    /// Settle: remove the message permanently
    async fn complete(&self, token: &LeaseToken) -> QueueResult<()>;

    /// Settle: release the lease so the message is redelivered
    async fn abandon(&self, token: &LeaseToken) -> QueueResult<()>;

    /// Settle: move the message to the error sub-queue
    async fn dead_letter(
        &self,
        token: &LeaseToken,
        reason: &str,
        description: &str,
    ) -> QueueResult<()>;

    /// Extend the lease by one lock duration, returning the new deadline
    async fn renew_lock(&self, token: &LeaseToken) -> QueueResult<DateTime<Utc>>;

    /// Event stream for observability (boxed for stable Rust)
    fn event_stream(&self) -> BoxStream<QueueEvent>;
}

#[async_trait]
impl<C: QueueClient + ?Sized> QueueClient for Arc<C> {
    async fn send(&self, message: OutgoingMessage) -> QueueResult<MessageId> {
        (**self).send(message).await
    }

    async fn receive(&self, mode: ReceiveMode) -> QueueResult<Option<ReceivedMessage>> {
        (**self).receive(mode).await
    }

    async fn complete(&self, token: &LeaseToken) -> QueueResult<()> {
        (**self).complete(token).await
    }

    async fn abandon(&self, token: &LeaseToken) -> QueueResult<()> {
        (**self).abandon(token).await
    }

    async fn dead_letter(
        &self,
        token: &LeaseToken,
        reason: &str,
        description: &str,
    ) -> QueueResult<()> {
        (**self).dead_letter(token, reason, description).await
    }

    async fn renew_lock(&self, token: &LeaseToken) -> QueueResult<DateTime<Utc>> {
        (**self).renew_lock(token).await
    }

    fn event_stream(&self) -> BoxStream<QueueEvent> {
        (**self).event_stream()
    }
}
