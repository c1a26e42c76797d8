use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lease_queue::{Clock, MessageId, OutgoingMessage, QueueClient};
use tracing::{info, instrument};

use crate::error::{ProbeError, ProbeResult};

/// A message the loop submitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// 1-based position in the run
    pub sequence: u32,
    pub message_id: MessageId,
}

/// Body of a synthetic test message
pub fn message_body(created_at: DateTime<Utc>) -> String {
    format!("This is a new test message for queue created at {}", created_at)
}

/// Producer loop: submits synthetic messages at a fixed pace
pub struct EnqueueLoop {
    client: Arc<dyn QueueClient>,
    clock: Arc<dyn Clock>,
    queue_name: String,
}

impl EnqueueLoop {
    pub fn new(client: Arc<dyn QueueClient>, clock: Arc<dyn Clock>, queue_name: impl Into<String>) -> Self {
        Self {
            client,
            clock,
            queue_name: queue_name.into(),
        }
    }

    /// Send `count` messages, pausing `wait` between submissions.
    /// The first failed submission ends the run.
    #[instrument(skip(self), fields(queue = %self.queue_name))]
    pub async fn run(&self, count: u32, wait: Duration) -> ProbeResult<Vec<SentMessage>> {
        let mut sent = Vec::with_capacity(count as usize);

        for sequence in 1..=count {
            let message_id = MessageId::new();
            let message = OutgoingMessage::new(message_id.clone(), message_body(self.clock.now()));

            self.client
                .send(message)
                .await
                .map_err(|source| ProbeError::Send { sequence, source })?;

            info!(
                "Loop {:03}: Sent message '{}' to queue '{}'",
                sequence, message_id, self.queue_name
            );
            sent.push(SentMessage { sequence, message_id });

            if sequence < count {
                self.clock.sleep(wait).await;
            }
        }

        Ok(sent)
    }
}
