use lease_queue::{BoxStream, QueueEvent};
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use lease_queue::wait_for_shutdown;

/// Log broker lifecycle events until the stream ends or shutdown is requested
pub async fn log_queue_events(mut events: BoxStream<QueueEvent>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let event = tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            event = events.next() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match &event {
            QueueEvent::LockExpired { message_id, delivery_count, .. } => info!(
                "Lock on message {} expired after delivery {}; message is available again",
                message_id, delivery_count
            ),
            QueueEvent::DeadLettered { message_id, reason, .. } => {
                info!("Message {} moved to the dead-letter queue: {}", message_id, reason)
            }
            QueueEvent::Expired { message_id, .. } => {
                info!("Message {} expired before it was consumed", message_id)
            }
            other => debug!("Queue event {} for message {}", other.event_name(), other.message_id()),
        }
    }
}
