// src/rabbitmq/mod.rs
// RabbitMQ publishing of invoice events

pub mod amqp_client;
pub mod connection;
pub mod diagnostics;
pub mod errors;
pub mod message;
pub mod publisher;
pub mod topology;

// Re-export specific items to simplify imports elsewhere
pub use amqp_client::{
    AmqpChannel, AmqpConnection, AmqpConnector, LapinConfig, LapinConnector,
};
pub use connection::{ConnectionManager, ConnectionState, Session};
pub use diagnostics::{format_message_as_json_or_text, FormattedBody};
pub use errors::{BrokerError, RabbitMQError, Result};
pub use message::{routing_key_for, InvoiceEventType, MessageProperties, OutboundMessage};
pub use publisher::{EventPublisher, InvoiceEventPublisher};
pub use topology::TopologyDescriptor;
