//! At-least-once messaging over broker streams with consumer groups
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐      append       ┌──────────────────┐
//! │  StreamProducer  │ ────────────────▶ │                  │
//! └──────────────────┘                   │   StreamBroker   │
//!                                        │  (Redis / mem)   │
//! ┌──────────────────┐   read_group /    │                  │
//! │  StreamConsumer  │ ◀──────────────── │                  │
//! │  (consume loop)  │ ────acknowledge─▶ └──────────────────┘
//! └──────────────────┘
//!          │ process / wait
//!          ▼
//! ┌──────────────────┐
//! │ MessageProcessor │  (application)
//! └──────────────────┘
//! ```
//!
//! A message is acknowledged only after the processor returns `Ok`. Messages
//! whose processing failed stay pending in the group; this layer never
//! reclaims or redelivers them.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stream_mq::messaging::{
//!     ConsumerConfig, Message, MessageConsumer, MessageProcessor, MessageProducer,
//!     MessagingResult, ProducerConfig, RedisBroker, StreamConsumer, StreamProducer,
//! };
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl MessageProcessor for Printer {
//!     async fn process(&self, message: &Message) -> MessagingResult<()> {
//!         println!("{} {}", message.id, message.data_as_str());
//!         Ok(())
//!     }
//!
//!     async fn wait(&self) -> MessagingResult<()> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Arc::new(RedisBroker::connect("redis://127.0.0.1:6379").await?);
//!     let producer = StreamProducer::new(broker, ProducerConfig::new("events", 1000));
//!
//!     let mut message = Message::new("hello");
//!     producer.send(&mut message).await?;
//!
//!     let broker = Arc::new(RedisBroker::connect("redis://127.0.0.1:6379").await?);
//!     let consumer = Arc::new(StreamConsumer::new(
//!         broker,
//!         ConsumerConfig::new("events", "printers", "printer-1"),
//!     ));
//!     consumer.set_message_processor(Arc::new(Printer));
//!
//!     let stopper = consumer.clone();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         let _ = stopper.stop().await;
//!     });
//!
//!     consumer.start().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod consumer;
mod decode;
mod error;
mod memory_broker;
mod message;
mod metrics;
mod producer;
mod redis_broker;
mod retry;
mod traits;

pub use config::{ConsumerConfig, ProducerConfig, RetryConfig};
pub use consumer::{ConsumerState, StreamConsumer};
pub use decode::decode_reply;
pub use error::{MessagingError, MessagingResult};
pub use memory_broker::{BrokerCall, InMemoryBroker};
pub use message::Message;
pub use metrics::{init_messaging_metrics, MESSAGING_METRICS};
pub use producer::StreamProducer;
pub use redis_broker::RedisBroker;
pub use retry::Backoff;
pub use traits::{MessageConsumer, MessageProcessor, MessageProducer, StreamBroker, DATA_FIELD};
