//! Error types for messaging operations

/// Result type for messaging operations
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;

/// Errors that can occur while producing or consuming stream messages
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Network or protocol failure talking to the broker
    #[error("Broker communication failed: {0}")]
    BrokerCommunication(String),

    /// The broker connection was closed by `stop` or `close`
    #[error("Broker connection closed")]
    ConnectionClosed,

    /// A group-read reply did not have the expected structure
    #[error("Malformed stream reply: {0}")]
    MessageShape(String),

    /// The application processor rejected a message
    #[error("Processing failed: {0}")]
    Processing(String),

    /// Acknowledging a processed message failed
    #[error("Acknowledge failed: {0}")]
    Acknowledge(String),

    /// `start` was called before a processor was bound
    #[error("Message processor not set")]
    ProcessorNotSet,

    /// Operation not allowed in the consumer's current state
    #[error("Invalid consumer state: {0}")]
    InvalidState(String),

    /// Payload (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The consume loop task failed unexpectedly
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MessagingError {
    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            MessagingError::BrokerCommunication(_) => "broker",
            MessagingError::ConnectionClosed => "closed",
            MessagingError::MessageShape(_) => "shape",
            MessagingError::Processing(_) => "processing",
            MessagingError::Acknowledge(_) => "ack",
            MessagingError::ProcessorNotSet => "no_processor",
            MessagingError::InvalidState(_) => "state",
            MessagingError::Serialization(_) => "serialization",
            MessagingError::Configuration(_) => "configuration",
            MessagingError::Internal(_) => "internal",
        }
    }
}

impl From<redis::RedisError> for MessagingError {
    fn from(err: redis::RedisError) -> Self {
        MessagingError::BrokerCommunication(err.to_string())
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(MessagingError::ConnectionClosed.kind(), "closed");
        assert_eq!(
            MessagingError::MessageShape("bad".to_string()).kind(),
            "shape"
        );
        assert_eq!(MessagingError::ProcessorNotSet.kind(), "no_processor");
    }

    #[test]
    fn test_from_serde_json() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: MessagingError = err.into();
        assert!(matches!(err, MessagingError::Serialization(_)));
    }
}
