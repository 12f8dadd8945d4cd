//! At-least-once message delivery over Redis streams using consumer groups.
//!
//! - [`messaging::StreamProducer`] appends messages and reports the assigned ID.
//! - [`messaging::StreamConsumer`] runs a blocking consume loop that hands each
//!   message to a [`messaging::MessageProcessor`], acknowledges it on success and
//!   drains the processor on shutdown.

pub mod config;
pub mod error;
pub mod messaging;

pub use error::{AppError, Result};
