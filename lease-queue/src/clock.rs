//! Time source shared by the broker and its consumers.
//!
//! Lease deadlines are wall-clock instants, so both sides of the protocol must
//! agree on "now". [`SystemClock`] reads the real clock; [`ManualClock`] keeps a
//! virtual instant that only moves when someone sleeps on it or advances it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Injectable wall clock with an async sleep
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;

    /// Wait for the given duration
    async fn sleep(&self, duration: Duration);
}

/// Real time: `Utc::now` plus `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual time for deterministic tests.
///
/// `sleep` advances the shared instant by the requested duration and yields,
/// so a monitor ticking every two seconds runs without real delay.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move virtual time forward
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock();
        *now += to_chrono(duration);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Convert a std duration, saturating at chrono's maximum
pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Elapsed time between two instants, zero if `later` is before `earlier`
pub fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or_default()
}
