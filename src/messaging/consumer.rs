//! Consumer-group consumer
//!
//! [`StreamConsumer::start`] runs the consume loop on its own task and blocks
//! until that task exits. The loop reads one entry at a time, hands it to the
//! bound [`MessageProcessor`] and acknowledges it only when processing
//! succeeded. Shutdown goes through [`MessageConsumer::stop`], called from
//! another task: it raises the exit flag and cancels the pending read, after
//! which the loop calls [`MessageProcessor::wait`] and finishes.
//!
//! ```text
//! Idle ──start──▶ Running ──stop + failed read──▶ Draining ──wait()──▶ Stopped
//! ```

use crate::messaging::config::{ConsumerConfig, RetryConfig};
use crate::messaging::decode::decode_reply;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::message::Message;
use crate::messaging::metrics::MESSAGING_METRICS;
use crate::messaging::retry::Backoff;
use crate::messaging::traits::{MessageConsumer, MessageProcessor, StreamBroker};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of a [`StreamConsumer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConsumerState {
    /// Constructed, `start` not called yet
    Idle,
    /// Consume loop executing
    Running,
    /// Stop observed; waiting for the processor to drain
    Draining,
    /// Loop exited
    Stopped,
}

/// Consumes one stream through a consumer group
pub struct StreamConsumer {
    broker: Arc<dyn StreamBroker>,
    config: ConsumerConfig,
    retry: RetryConfig,
    processor: RwLock<Option<Arc<dyn MessageProcessor>>>,
    state: Arc<Mutex<ConsumerState>>,
    exit_requested: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl StreamConsumer {
    /// Create a new consumer. The broker connection is owned by the consumer
    /// for the duration of the run and closed once it stops.
    pub fn new(broker: Arc<dyn StreamBroker>, config: ConsumerConfig) -> Self {
        Self {
            broker,
            config,
            retry: RetryConfig::default(),
            processor: RwLock::new(None),
            state: Arc::new(Mutex::new(ConsumerState::Idle)),
            exit_requested: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Override the backoff applied between failed reads
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConsumerState {
        *self.state.lock()
    }

    /// Whether `stop` has been called
    pub fn is_exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageConsumer for StreamConsumer {
    fn set_message_processor(&self, processor: Arc<dyn MessageProcessor>) {
        *self.processor.write() = Some(processor);
    }

    async fn start(&self) -> MessagingResult<()> {
        let processor = self
            .processor
            .read()
            .clone()
            .ok_or(MessagingError::ProcessorNotSet)?;

        {
            let mut state = self.state.lock();
            if *state != ConsumerState::Idle {
                return Err(MessagingError::InvalidState(format!(
                    "cannot start a consumer that is {}",
                    *state
                )));
            }
            *state = ConsumerState::Running;
        }

        let stream = self.config.stream_key.as_str();
        let group = self.config.group_name.as_str();
        let consumer = self.config.consumer_name.as_str();

        if let Err(e) = self.broker.ensure_group(stream, group).await {
            warn!(stream, group, error = %e, "Failed to create consumer group");
        }

        info!(stream, group, consumer, "Starting consume loop");

        let consume_loop = ConsumeLoop {
            broker: self.broker.clone(),
            config: self.config.clone(),
            processor,
            backoff: Backoff::new(self.retry.clone()),
            exit_requested: self.exit_requested.clone(),
            shutdown: self.shutdown.clone(),
            state: self.state.clone(),
        };

        let outcome = tokio::spawn(consume_loop.run()).await;

        *self.state.lock() = ConsumerState::Stopped;

        if let Err(e) = self.broker.close().await {
            debug!(stream, group, error = %e, "Failed to close broker connection");
        }

        match outcome {
            Ok(()) => {
                info!(stream, group, consumer, "Consumer exited");
                Ok(())
            }
            Err(e) => {
                error!(stream, group, consumer, error = %e, "Consume loop aborted");
                Err(MessagingError::Internal(format!(
                    "consume loop task failed: {}",
                    e
                )))
            }
        }
    }

    async fn stop(&self) -> MessagingResult<()> {
        if self.exit_requested.swap(true, Ordering::SeqCst) {
            warn!(
                stream = %self.config.stream_key,
                consumer = %self.config.consumer_name,
                "Consumer stop already requested"
            );
            return Ok(());
        }

        info!(
            stream = %self.config.stream_key,
            consumer = %self.config.consumer_name,
            "Stopping consumer"
        );
        self.shutdown.cancel();

        Ok(())
    }
}

/// State moved onto the loop task
struct ConsumeLoop {
    broker: Arc<dyn StreamBroker>,
    config: ConsumerConfig,
    processor: Arc<dyn MessageProcessor>,
    backoff: Backoff,
    exit_requested: Arc<AtomicBool>,
    shutdown: CancellationToken,
    state: Arc<Mutex<ConsumerState>>,
}

impl ConsumeLoop {
    async fn run(mut self) {
        loop {
            match self.read_message().await {
                Ok(message) => {
                    self.backoff.reset();
                    self.process_message(message).await;
                }
                Err(e) if self.exit_requested.load(Ordering::SeqCst) => {
                    debug!(error = %e, "Read ended by shutdown");
                    self.drain().await;
                    return;
                }
                Err(e @ MessagingError::MessageShape(_)) => {
                    // the read itself succeeded, so the connection needs no backoff
                    MESSAGING_METRICS
                        .read_failures
                        .with_label_values(&[
                            &self.config.stream_key,
                            &self.config.group_name,
                            e.kind(),
                        ])
                        .inc();
                    self.backoff.reset();
                    warn!(
                        stream = %self.config.stream_key,
                        group = %self.config.group_name,
                        error = %e,
                        "Skipping undecodable entry"
                    );
                }
                Err(e) => {
                    MESSAGING_METRICS
                        .read_failures
                        .with_label_values(&[
                            &self.config.stream_key,
                            &self.config.group_name,
                            e.kind(),
                        ])
                        .inc();

                    let delay = self.backoff.next_delay();
                    error!(
                        stream = %self.config.stream_key,
                        group = %self.config.group_name,
                        error = %e,
                        failures = self.backoff.failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to read message"
                    );

                    tokio::select! {
                        _ = self.shutdown.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn read_message(&self) -> MessagingResult<Message> {
        let reply = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(MessagingError::ConnectionClosed),
            reply = self.broker.read_group(
                &self.config.stream_key,
                &self.config.group_name,
                &self.config.consumer_name,
            ) => reply?,
        };

        decode_reply(&self.config.stream_key, &reply)
    }

    async fn process_message(&self, message: Message) {
        debug!(message_id = %message.id, bytes = message.data.len(), "Processing message");
        trace!(message_id = %message.id, data = %message.data_as_str(), "Message payload");

        match self.processor.process(&message).await {
            Ok(()) => {
                MESSAGING_METRICS
                    .messages_processed
                    .with_label_values(&[&self.config.stream_key, &self.config.group_name])
                    .inc();
                self.ack(&message).await;
            }
            Err(e) => {
                MESSAGING_METRICS
                    .processing_failures
                    .with_label_values(&[&self.config.stream_key, &self.config.group_name])
                    .inc();
                error!(message_id = %message.id, error = %e, "Failed to process message, leaving it pending");
            }
        }
    }

    async fn ack(&self, message: &Message) {
        match self
            .broker
            .acknowledge(
                &self.config.stream_key,
                &self.config.group_name,
                &message.id,
            )
            .await
        {
            Ok(count) => {
                MESSAGING_METRICS
                    .acks
                    .with_label_values(&[&self.config.stream_key, &self.config.group_name])
                    .inc();
                debug!(message_id = %message.id, acked = count, "Message acknowledged");
            }
            Err(e) => {
                MESSAGING_METRICS
                    .ack_failures
                    .with_label_values(&[&self.config.stream_key, &self.config.group_name])
                    .inc();
                let e = MessagingError::Acknowledge(e.to_string());
                error!(message_id = %message.id, error = %e, "Message stays pending");
            }
        }
    }

    async fn drain(&self) {
        *self.state.lock() = ConsumerState::Draining;
        info!(
            stream = %self.config.stream_key,
            consumer = %self.config.consumer_name,
            "Waiting for in-flight messages to finish"
        );

        if let Err(e) = self.processor.wait().await {
            error!(error = %e, "Message processor failed to drain");
        }
    }
}
