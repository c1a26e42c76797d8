use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use lease_queue::{open_receiver, Clock, QueueClient, ReceiveMode, ReceiverOptions};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, instrument};

use crate::error::{ProbeError, ProbeResult};
use crate::hooks::{ExceptionAction, ExceptionHandler, ExceptionReceived, LogExceptions};
use crate::monitor::{LeaseMonitor, MonitorOutcome, MonitorReport};
use crate::output::{ConsoleSink, TraceSink};
use crate::policy::DispositionPolicy;

/// Settings fixed for the lifetime of a receive session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub policy: DispositionPolicy,
    /// How long the lock may be renewed after delivery
    pub lock_renew: Duration,
    pub tick_period: Duration,
    /// Upper bound for each settle or renew call
    pub settle_timeout: Duration,
    pub max_concurrent_calls: usize,
    /// Reports kept in [`SessionSummary::recent`]; older ones only count
    pub report_history: usize,
}

impl SessionConfig {
    pub fn new(policy: DispositionPolicy, lock_renew: Duration) -> Self {
        Self {
            policy,
            lock_renew,
            ..Self::default()
        }
    }

    pub fn with_tick_period(mut self, tick_period: Duration) -> Self {
        self.tick_period = tick_period;
        self
    }

    pub fn with_settle_timeout(mut self, settle_timeout: Duration) -> Self {
        self.settle_timeout = settle_timeout;
        self
    }

    pub fn with_max_concurrent_calls(mut self, max_concurrent_calls: usize) -> Self {
        self.max_concurrent_calls = max_concurrent_calls;
        self
    }

    pub fn with_report_history(mut self, report_history: usize) -> Self {
        self.report_history = report_history;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            policy: DispositionPolicy::Complete,
            lock_renew: Duration::from_secs(60),
            tick_period: Duration::from_secs(2),
            settle_timeout: Duration::from_secs(30),
            max_concurrent_calls: 1,
            report_history: 32,
        }
    }
}

/// Outcome counts for a session, plus its latest reports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub completed: usize,
    pub abandoned: usize,
    pub dead_lettered: usize,
    pub expired: usize,
    pub cancelled: usize,
    /// Settle failures and deliveries without a lease
    pub failed: usize,
    recent: VecDeque<MonitorReport>,
}

impl SessionSummary {
    pub fn total(&self) -> usize {
        self.completed + self.abandoned + self.dead_lettered + self.expired + self.cancelled + self.failed
    }

    /// Most recent reports, oldest first
    pub fn recent(&self) -> &VecDeque<MonitorReport> {
        &self.recent
    }

    fn record(&mut self, report: MonitorReport, history: usize) {
        match report.outcome {
            MonitorOutcome::Completed => self.completed += 1,
            MonitorOutcome::Abandoned => self.abandoned += 1,
            MonitorOutcome::DeadLettered => self.dead_lettered += 1,
            MonitorOutcome::Expired => self.expired += 1,
            MonitorOutcome::Cancelled => self.cancelled += 1,
            MonitorOutcome::SettleFailed(_) | MonitorOutcome::NotLeased => self.failed += 1,
        }

        if history == 0 {
            return;
        }
        if self.recent.len() == history {
            self.recent.pop_front();
        }
        self.recent.push_back(report);
    }
}

/// Peek-lock receive loop: one [`LeaseMonitor`] per delivered message
pub struct ReceiveSession {
    client: Arc<dyn QueueClient>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    sink: Arc<dyn TraceSink>,
    exceptions: Arc<dyn ExceptionHandler>,
}

impl ReceiveSession {
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

    /// Monitor configured like the ones this session spawns
    pub fn monitor(&self) -> LeaseMonitor {
        LeaseMonitor::new(self.client.clone(), self.clock.clone(), self.config.clone())
            .with_sink(self.sink.clone())
            .with_exception_handler(self.exceptions.clone())
    }

    /// Receive and monitor messages until shutdown. Every delivery is
    /// counted; only the last `report_history` reports are kept.
    #[instrument(skip_all, fields(policy = %self.config.policy, lock_renew = ?self.config.lock_renew))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> ProbeResult<SessionSummary> {
        let options = ReceiverOptions {
            max_concurrent_calls: self.config.max_concurrent_calls,
            ..ReceiverOptions::default()
        };
        let mut receiver = open_receiver(self.client.clone(), ReceiveMode::PeekLock, options, shutdown.clone());

        info!("Receive session started");

        let mut monitors = JoinSet::new();
        let mut summary = SessionSummary::default();
        let history = self.config.report_history;

        loop {
            tokio::select! {
                delivery = receiver.next() => match delivery {
                    Some(Ok(delivery)) => {
                        let monitor = self.monitor();
                        let shutdown = shutdown.clone();
                        monitors.spawn(async move {
                            let report = monitor.run(delivery.message(), shutdown).await;
                            drop(delivery);
                            report
                        });
                    }
                    Some(Err(error)) => {
                        let event = ExceptionReceived::new(error, ExceptionAction::Receive, None);
                        self.exceptions.exception_received(&event).await;
                    }
                    None => break,
                },
                Some(joined) = monitors.join_next() => {
                    summary.record(joined.map_err(|e| ProbeError::Receive(e.to_string()))?, history);
                }
            }
        }

        while let Some(joined) = monitors.join_next().await {
            summary.record(joined.map_err(|e| ProbeError::Receive(e.to_string()))?, history);
        }

        receiver.close().await;
        info!("Receive session stopped after {} messages", summary.total());

        Ok(summary)
    }
}
