//! # lease-probe: make peek-lock lease behaviour observable
//!
//! Two halves drive a [`QueueClient`](lease_queue::QueueClient):
//!
//! - [`EnqueueLoop`] submits synthetic messages at a fixed pace
//! - [`ReceiveSession`] leases messages and runs a [`LeaseMonitor`] on each,
//!   printing a countdown of the lease and settling the message the way the
//!   chosen [`DispositionPolicy`] says: complete, abandon, dead-letter, or
//!   hold on and let the lock expire
//!
//! [`TriggerHost`] is the one-shot variant: each delivered message is
//! completed, or dead-lettered when its payload is blank.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use lease_queue::{SystemClock, backend::memory::MemoryBroker};
//! use lease_probe::{DispositionPolicy, EnqueueLoop, ReceiveSession, SessionConfig};
//!
//! # async fn demo() -> lease_probe::ProbeResult<()> {
//! let broker = Arc::new(MemoryBroker::new());
//! let clock = Arc::new(SystemClock);
//!
//! EnqueueLoop::new(broker.clone(), clock.clone(), "demoqueue")
//!     .run(3, Duration::from_millis(10))
//!     .await?;
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let config = SessionConfig::new(DispositionPolicy::LockExpire, Duration::from_secs(5));
//! let summary = ReceiveSession::new(broker, clock, config).run(shutdown_rx).await?;
//! println!("{} leases expired", summary.expired);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod enqueue;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod monitor;
pub mod observe;
pub mod output;
pub mod policy;
pub mod session;
pub mod trigger;

pub use config::{QueueSettings, Settings};
pub use enqueue::{EnqueueLoop, SentMessage};
pub use error::{ProbeError, ProbeResult};
pub use hooks::{ExceptionAction, ExceptionHandler, ExceptionReceived, LogExceptions};
pub use monitor::{LeaseMonitor, LeaseRow, MonitorOutcome, MonitorReport, MonitorState};
pub use output::{ConsoleSink, MemorySink, TraceSink};
pub use policy::{Disposition, DispositionPolicy, Renewal, TickAction};
pub use session::{ReceiveSession, SessionConfig, SessionSummary};
pub use trigger::{handle_triggered, TriggerConfig, TriggerHost, TriggerSummary};
