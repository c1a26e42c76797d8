pub mod ids;
pub mod message;
pub mod received;
pub mod events;

pub use ids::{MessageId, LeaseToken};
pub use message::OutgoingMessage;
pub use received::{ReceiveMode, MessageState, MessageRecord, ReceivedMessage};
pub use events::QueueEvent;
