//! Triggered handler: one message per invocation.
//!
//! The host leases messages, keeps each lock alive for up to `lock_renew`
//! while the handler runs, and hands every message to [`handle_triggered`].
//! The handler applies the two-branch payload policy and settles once.
//! Handlers still running at shutdown are dropped without settling, so
//! their leases lapse and the broker redelivers the messages.

use std::sync::Arc;
use std::time::Duration;

use lease_queue::clock::elapsed_between;
use lease_queue::{
    open_receiver, wait_for_shutdown, Clock, LeaseToken, QueueClient, QueueError, QueueResult,
    ReceiveMode, ReceivedMessage, ReceiverOptions,
};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::error::{ProbeError, ProbeResult};
use crate::hooks::{ExceptionAction, ExceptionHandler, ExceptionReceived, LogExceptions};
use crate::output::format_time;
use crate::policy::{Disposition, DispositionPolicy};

/// Settle one triggered message: dead-letter blank payloads, complete the rest
pub async fn handle_triggered<C>(client: &C, message: &ReceivedMessage) -> QueueResult<Disposition>
where
    C: QueueClient + ?Sized,
{
    info!(
        "{:>4}{:>38}{:>20}{:>3}{:>15}{:>23}",
        "Id:",
        message.message_id.as_str(),
        "Deliver Count:",
        message.delivery_count,
        "EnqueueDate:",
        format_time(message.enqueued_at)
    );

    let token = message
        .lease_token
        .as_ref()
        .ok_or_else(|| QueueError::NotLeased(message.message_id.to_string()))?;

    let disposition = DispositionPolicy::for_payload(&message.body);
    if disposition == Disposition::Complete {
        info!("Completing message");
    } else {
        info!("Dead-lettering message {} with empty content", message.message_id);
    }

    disposition.apply(client, token).await?;
    Ok(disposition)
}

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub max_concurrent_calls: usize,
    /// Longest time a lock is kept alive while the handler runs
    pub lock_renew: Duration,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 16,
            lock_renew: Duration::from_secs(60),
        }
    }
}

/// Counts of what the host did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerSummary {
    pub completed: usize,
    pub dead_lettered: usize,
    pub failed: usize,
}

/// Runs [`handle_triggered`] over a receive pump
pub struct TriggerHost {
    client: Arc<dyn QueueClient>,
    clock: Arc<dyn Clock>,
    config: TriggerConfig,
    exceptions: Arc<dyn ExceptionHandler>,
}

impl TriggerHost {
    pub fn new(client: Arc<dyn QueueClient>, clock: Arc<dyn Clock>, config: TriggerConfig) -> Self {
        Self {
            client,
            clock,
            config,
            exceptions: Arc::new(LogExceptions),
        }
    }

    pub fn with_exception_handler(mut self, exceptions: Arc<dyn ExceptionHandler>) -> Self {
        self.exceptions = exceptions;
        self
    }

    #[instrument(skip_all, fields(max_concurrent_calls = self.config.max_concurrent_calls))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> ProbeResult<TriggerSummary> {
        let options = ReceiverOptions {
            max_concurrent_calls: self.config.max_concurrent_calls,
            ..ReceiverOptions::default()
        };
        let mut receiver = open_receiver(self.client.clone(), ReceiveMode::PeekLock, options, shutdown.clone());

        info!("Trigger host started");

        let mut handlers = JoinSet::new();
        let mut summary = TriggerSummary::default();

        loop {
            tokio::select! {
                delivery = receiver.next() => match delivery {
                    Some(Ok(delivery)) => {
                        let client = self.client.clone();
                        let clock = self.clock.clone();
                        let exceptions = self.exceptions.clone();
                        let lock_renew = self.config.lock_renew;
                        let mut shutdown = shutdown.clone();
                        handlers.spawn(async move {
                            let message = delivery.message();
                            let result = tokio::select! {
                                biased;
                                result = handle_triggered(client.as_ref(), message) => result,
                                _ = keep_lock_alive(client.as_ref(), clock.as_ref(), message, lock_renew) => {
                                    Err(QueueError::Internal("lock renewal stopped unexpectedly".to_string()))
                                }
                                _ = wait_for_shutdown(&mut shutdown) => Err(QueueError::ReceiverClosed),
                            };
                            if let Err(error) = &result {
                                let event = ExceptionReceived::new(
                                    error.clone(),
                                    ExceptionAction::Callback,
                                    Some(message.message_id.clone()),
                                );
                                exceptions.exception_received(&event).await;
                            }
                            result
                        });
                    }
                    Some(Err(error)) => {
                        let event = ExceptionReceived::new(error, ExceptionAction::Receive, None);
                        self.exceptions.exception_received(&event).await;
                    }
                    None => break,
                },
                Some(joined) = handlers.join_next() => {
                    summary.record(joined.map_err(|e| ProbeError::Receive(e.to_string()))?);
                }
            }
        }

        while let Some(joined) = handlers.join_next().await {
            summary.record(joined.map_err(|e| ProbeError::Receive(e.to_string()))?);
        }

        receiver.close().await;
        info!(
            "Trigger host stopped: {} completed, {} dead-lettered, {} failed",
            summary.completed, summary.dead_lettered, summary.failed
        );

        Ok(summary)
    }
}

impl TriggerSummary {
    fn record(&mut self, result: QueueResult<Disposition>) {
        match result {
            Ok(Disposition::Complete) => self.completed += 1,
            Ok(Disposition::DeadLetter { .. }) => self.dead_lettered += 1,
            Ok(Disposition::Abandon) | Err(_) => self.failed += 1,
        }
    }
}

/// Renew the lock at half its remaining time until `lock_renew` has elapsed.
/// Never returns; once renewal stops it waits forever.
async fn keep_lock_alive<C>(client: &C, clock: &dyn Clock, message: &ReceivedMessage, lock_renew: Duration)
where
    C: QueueClient + ?Sized,
{
    if let (Some(token), Some(mut locked_until)) = (message.lease_token.as_ref(), message.locked_until) {
        let started = clock.now();
        while let Some(next) = renew_at_half_life(client, clock, token, locked_until, started, lock_renew).await {
            locked_until = next;
        }
    }
    std::future::pending::<()>().await;
}

async fn renew_at_half_life<C>(
    client: &C,
    clock: &dyn Clock,
    token: &LeaseToken,
    locked_until: chrono::DateTime<chrono::Utc>,
    started: chrono::DateTime<chrono::Utc>,
    lock_renew: Duration,
) -> Option<chrono::DateTime<chrono::Utc>>
where
    C: QueueClient + ?Sized,
{
    clock.sleep(elapsed_between(clock.now(), locked_until) / 2).await;
    if elapsed_between(started, clock.now()) >= lock_renew {
        debug!("Lock renewal window of {:?} used up", lock_renew);
        return None;
    }

    match client.renew_lock(token).await {
        Ok(next) => Some(next),
        Err(e) => {
            warn!("Lock renewal failed: {}", e);
            None
        }
    }
}
