//! The unit of data exchanged over a stream

use crate::messaging::error::MessagingResult;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::borrow::Cow;

/// A stream message
///
/// `id` is assigned by the broker. An empty `id` asks the broker to generate
/// one on send; a non-empty `id` is used verbatim and must be strictly greater
/// than the last entry of the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Broker-assigned entry identifier (`<ms>-<seq>`)
    pub id: String,

    /// Opaque payload
    pub data: Vec<u8>,
}

impl Message {
    /// Create a message whose ID will be assigned by the broker
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            id: String::new(),
            data: data.into(),
        }
    }

    /// Create a message with a caller-pinned ID
    pub fn with_id(id: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
        }
    }

    /// Create a message carrying the JSON encoding of `value`
    pub fn from_json<T: Serialize>(value: &T) -> MessagingResult<Self> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }

    /// Decode the payload as JSON
    pub fn json<T: DeserializeOwned>(&self) -> MessagingResult<T> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Whether an ID has been pinned or assigned
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// Payload as text, for logging
    pub fn data_as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}
