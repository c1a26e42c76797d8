pub mod storage;
pub mod reaper;

pub use storage::{BrokerConfig, MemoryBroker, MAX_DELIVERY_COUNT_EXCEEDED, TTL_EXPIRED};
pub use reaper::LeaseReaper;
