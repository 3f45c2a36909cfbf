// src/rabbitmq/errors.rs

use lapin::Error as LapinError;
use serde_json::Error as SerdeError;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by the broker client itself.
///
/// This is what the [`AmqpChannel`](super::amqp_client::AmqpChannel) family of
/// traits return. The connection manager and publisher wrap it into a
/// [`RabbitMQError`] that says *which* stage failed.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Amqp(#[from] LapinError),

    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("message returned by broker: {reply_code} {reply_text}")]
    Returned { reply_code: u16, reply_text: String },

    #[error("message was nacked by broker")]
    Nacked,

    #[error("{0}")]
    Other(String),
}

impl From<&str> for BrokerError {
    fn from(message: &str) -> Self {
        BrokerError::Other(message.to_string())
    }
}

#[derive(Debug, Error)]
pub enum RabbitMQError {
    /// Connect, channel-open or topology declaration failed.
    #[error("RabbitMQ connection error: {0}")]
    ConnectionError(#[source] BrokerError),

    /// The publish itself failed after a channel was obtained.
    #[error("RabbitMQ publish error: {0}")]
    PublishError(#[source] BrokerError),

    #[error("Message serialization error: {0}")]
    SerializationError(#[from] SerdeError),

    #[error("Invalid event type: {0:?}")]
    InvalidEventType(String),

    #[error("RabbitMQ connection manager is closed")]
    Closed,

    #[error("Operation cancelled")]
    Cancelled,
}

impl RabbitMQError {
    /// Whether a later call may succeed where this one failed.
    ///
    /// Broker failures leave the manager invalidated so the next call starts
    /// from a fresh connection; the rest are permanent for the given input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RabbitMQError::ConnectionError(_)
                | RabbitMQError::PublishError(_)
                | RabbitMQError::Cancelled
        )
    }
}

// Custom Result type for RabbitMQ operations
pub type Result<T> = std::result::Result<T, RabbitMQError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_failures_are_retryable() {
        assert!(RabbitMQError::ConnectionError("refused".into()).is_retryable());
        assert!(RabbitMQError::PublishError(BrokerError::Nacked).is_retryable());
        assert!(RabbitMQError::Cancelled.is_retryable());
    }

    #[test]
    fn closed_and_caller_errors_are_not_retryable() {
        assert!(!RabbitMQError::Closed.is_retryable());
        assert!(!RabbitMQError::InvalidEventType(String::new()).is_retryable());
    }

    #[test]
    fn returned_message_describes_reply() {
        let err = BrokerError::Returned {
            reply_code: 312,
            reply_text: "NO_ROUTE".to_string(),
        };
        assert_eq!(err.to_string(), "message returned by broker: 312 NO_ROUTE");
        let wrapped = RabbitMQError::PublishError(err);
        assert_eq!(
            wrapped.to_string(),
            "RabbitMQ publish error: message returned by broker: 312 NO_ROUTE"
        );
    }
}
