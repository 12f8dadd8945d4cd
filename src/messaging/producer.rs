//! Stream producer

use crate::messaging::config::ProducerConfig;
use crate::messaging::error::MessagingResult;
use crate::messaging::message::Message;
use crate::messaging::metrics::MESSAGING_METRICS;
use crate::messaging::traits::{MessageProducer, StreamBroker};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Appends messages to a single stream
pub struct StreamProducer {
    broker: Arc<dyn StreamBroker>,
    config: ProducerConfig,
}

impl StreamProducer {
    /// Create a new producer
    pub fn new(broker: Arc<dyn StreamBroker>, config: ProducerConfig) -> Self {
        Self { broker, config }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }
}

#[async_trait]
impl MessageProducer for StreamProducer {
    async fn send(&self, message: &mut Message) -> MessagingResult<()> {
        let stream = self.config.stream_key.as_str();
        let pinned = message.has_id().then_some(message.id.as_str());

        let assigned = match self
            .broker
            .append(stream, self.config.max_len, pinned, &message.data)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(stream, pinned_id = ?pinned, error = %e, "Failed to append message");
                MESSAGING_METRICS
                    .send_failures
                    .with_label_values(&[stream, e.kind()])
                    .inc();
                return Err(e);
            }
        };

        MESSAGING_METRICS
            .messages_sent
            .with_label_values(&[stream])
            .inc();
        debug!(stream, message_id = %assigned, bytes = message.data.len(), "Message appended");

        if !message.has_id() {
            message.id = assigned;
        }

        Ok(())
    }
}
