use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, debug};

use crate::backend::memory::storage::MemoryBroker;

/// Background sweeper that returns lapsed leases to the queue.
///
/// The broker also reclaims lazily on every receive and settle call; the
/// reaper makes redelivery (and the matching events) happen even when no
/// consumer is polling.
pub struct LeaseReaper {
    broker: MemoryBroker,
    interval: Duration,
}

impl LeaseReaper {
    pub fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            interval: Duration::from_secs(5),
        }
    }

    pub fn with_interval(broker: MemoryBroker, interval: Duration) -> Self {
        Self { broker, interval }
    }

    /// Run until the shutdown flag flips to `true` or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);

        info!("Starting lease reaper with interval: {:?}", self.interval);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let reclaimed = self.reap_expired_locks();
                    if reclaimed > 0 {
                        info!("Reclaimed {} lapsed leases", reclaimed);
                    } else {
                        debug!("No lapsed leases found");
                    }
                }
            }
        }

        debug!("Lease reaper stopped");
    }

    /// Spawn the reaper onto the current runtime
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run one reaper cycle
    pub fn reap_expired_locks(&self) -> usize {
        self.broker.reclaim_expired_locks()
    }
}
