//! # lease-queue: peek-lock queue contract and in-memory broker
//!
//! A competing-consumer queue hands each message to one consumer at a time
//! under a time-bounded lease. The holder settles it with the lease token:
//!
//! - **complete** removes the message
//! - **abandon** releases it for immediate redelivery
//! - **dead-letter** moves it to the error sub-queue with a reason
//! - doing nothing lets the lease lapse; the broker then redelivers it with
//!   its delivery count incremented
//!
//! [`QueueClient`] is the contract consumers program against.
//! [`MemoryBroker`](backend::memory::MemoryBroker) implements it in process,
//! and [`open_receiver`] turns any client into a stream of deliveries.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lease_queue::prelude::*;
//! use lease_queue::backend::memory::MemoryBroker;
//!
//! # async fn demo() -> QueueResult<()> {
//! let broker = Arc::new(MemoryBroker::new());
//! broker.send(OutgoingMessage::new(MessageId::new(), "hello")).await?;
//!
//! if let Some(message) = broker.receive(ReceiveMode::PeekLock).await? {
//!     if let Some(token) = &message.lease_token {
//!         broker.complete(token).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod types;
pub mod error;
pub mod clock;
pub mod backend;
pub mod receiver;

pub use types::{
    MessageId, LeaseToken, OutgoingMessage, ReceiveMode, MessageState, MessageRecord,
    ReceivedMessage, QueueEvent
};
pub use error::{QueueError, QueueResult};
pub use clock::{Clock, SystemClock, ManualClock};
pub use backend::{QueueClient, BoxStream};
pub use receiver::{open_receiver, wait_for_shutdown, Delivery, MessageReceiver, ReceiverOptions};

pub mod prelude {
    pub use crate::{
        QueueClient, QueueError, QueueResult, MessageId, LeaseToken, OutgoingMessage,
        ReceivedMessage, ReceiveMode, Clock, SystemClock
    };

    pub use async_trait::async_trait;
}
