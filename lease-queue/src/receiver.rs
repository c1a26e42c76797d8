use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn, debug};

use crate::{QueueResult, ReceivedMessage, ReceiveMode, backend::QueueClient};

/// Options for a receive pump
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// Deliveries that may be in flight at once; no new message is leased
    /// while all of them are held
    pub max_concurrent_calls: usize,
    /// Pause after an empty receive
    pub idle_poll: Duration,
    /// Pause after a failed receive
    pub error_backoff: Duration,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 1,
            idle_poll: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// A delivered message together with its concurrency slot.
/// The slot is released when the delivery is dropped.
#[derive(Debug)]
pub struct Delivery {
    message: ReceivedMessage,
    _permit: OwnedSemaphorePermit,
}

impl Delivery {
    pub fn message(&self) -> &ReceivedMessage {
        &self.message
    }
}

/// Stream of deliveries fed by a background pump
pub struct MessageReceiver {
    deliveries: mpsc::Receiver<QueueResult<Delivery>>,
    join_handle: JoinHandle<()>,
}

impl MessageReceiver {
    /// Next delivery or pipeline error; `None` once the pump has stopped
    pub async fn next(&mut self) -> Option<QueueResult<Delivery>> {
        self.deliveries.recv().await
    }

    /// Stop consuming and wait for the pump to exit
    pub async fn close(self) {
        drop(self.deliveries);
        if let Err(e) = self.join_handle.await {
            warn!("Receive pump join error: {}", e);
        }
    }
}

/// Open a receiver: a background task repeatedly receives from `client` and
/// forwards each message (or receive error) to the returned stream.
pub fn open_receiver<C>(
    client: Arc<C>,
    mode: ReceiveMode,
    options: ReceiverOptions,
    shutdown: watch::Receiver<bool>,
) -> MessageReceiver
where
    C: QueueClient + ?Sized + 'static,
{
    let slots = options.max_concurrent_calls.max(1);
    let (tx, deliveries) = mpsc::channel(slots);
    let permits = Arc::new(Semaphore::new(slots));

    let join_handle = tokio::spawn(pump(client, mode, options, permits, tx, shutdown));

    MessageReceiver {
        deliveries,
        join_handle,
    }
}

async fn pump<C>(
    client: Arc<C>,
    mode: ReceiveMode,
    options: ReceiverOptions,
    permits: Arc<Semaphore>,
    tx: mpsc::Sender<QueueResult<Delivery>>,
    mut shutdown: watch::Receiver<bool>,
) where
    C: QueueClient + ?Sized + 'static,
{
    info!("Receiver started in {:?} mode (max concurrent calls: {})", mode, options.max_concurrent_calls);

    loop {
        let permit = tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let result = tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            result = client.receive(mode) => result,
        };

        match result {
            Ok(Some(message)) => {
                debug!("Delivering message {}", message.message_id);
                let delivery = Delivery { message, _permit: permit };
                if tx.send(Ok(delivery)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => break,
                    _ = tokio::time::sleep(options.idle_poll) => {}
                }
            }
            Err(e) => {
                drop(permit);
                warn!("Receive failed: {}", e);
                if tx.send(Err(e)).await.is_err() {
                    break;
                }
                tokio::select! {
                    _ = wait_for_shutdown(&mut shutdown) => break,
                    _ = tokio::time::sleep(options.error_backoff) => {}
                }
            }
        }
    }

    info!("Receiver stopped");
}

/// Resolve once shutdown is requested or the signal's sender is gone
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
