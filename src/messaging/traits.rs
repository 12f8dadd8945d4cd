//! Messaging trait abstractions

use crate::messaging::error::MessagingResult;
use crate::messaging::message::Message;
use async_trait::async_trait;
use std::sync::Arc;

/// Field under which the payload is stored in every stream entry
pub const DATA_FIELD: &str = "data";

/// Stream operations required from a broker offering consumer groups
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Append `payload` to `stream`, trimming it to roughly `max_len` entries.
    /// `id` of `None` requests an auto-generated ID. Returns the entry ID.
    async fn append(
        &self,
        stream: &str,
        max_len: usize,
        id: Option<&str>,
        payload: &[u8],
    ) -> MessagingResult<String>;

    /// Create `group` on `stream` starting at the beginning, creating the
    /// stream if missing. An existing group is not an error.
    async fn ensure_group(&self, stream: &str, group: &str) -> MessagingResult<()>;

    /// Block until one new entry is delivered to `consumer` and return the raw reply
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> MessagingResult<redis::Value>;

    /// Acknowledge entry `id`, returning the number of entries acknowledged
    async fn acknowledge(&self, stream: &str, group: &str, id: &str) -> MessagingResult<i64>;

    /// Close the connection; later operations fail
    async fn close(&self) -> MessagingResult<()>;
}

/// Message producer trait
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Append a message to the stream. When `message.id` is empty it is set
    /// to the broker-assigned ID on success.
    async fn send(&self, message: &mut Message) -> MessagingResult<()>;
}

/// Application capability invoked for every delivered message
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Process one message. Returning an error leaves it unacknowledged.
    async fn process(&self, message: &Message) -> MessagingResult<()>;

    /// Join any work dispatched by `process`. Called once during shutdown.
    async fn wait(&self) -> MessagingResult<()>;
}

/// Message consumer trait
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Bind the processor used for every delivered message
    fn set_message_processor(&self, processor: Arc<dyn MessageProcessor>);

    /// Run the consume loop, returning once it has stopped and drained
    async fn start(&self) -> MessagingResult<()>;

    /// Request shutdown; returns without waiting for the drain
    async fn stop(&self) -> MessagingResult<()>;
}
