// src/rabbitmq/message.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ROUTING_KEY_PREFIX: &str = "invoice";
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// AMQP delivery mode 2: the broker writes the message to disk.
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Invoice lifecycle events the CRUD layer emits after a committed mutation.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum InvoiceEventType {
    Created,
    Updated,
    Deleted,
    Paid,
    Overdue,
}

impl InvoiceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceEventType::Created => "Created",
            InvoiceEventType::Updated => "Updated",
            InvoiceEventType::Deleted => "Deleted",
            InvoiceEventType::Paid => "Paid",
            InvoiceEventType::Overdue => "Overdue",
        }
    }

    pub fn routing_key(&self) -> String {
        routing_key_for(self.as_str())
    }
}

impl fmt::Display for InvoiceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for InvoiceEventType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Routing key for an event type: `invoice.<lowercased event type>`.
pub fn routing_key_for(event_type: &str) -> String {
    format!("{}.{}", ROUTING_KEY_PREFIX, event_type.to_lowercase())
}

/// Broker-agnostic subset of the AMQP basic properties we set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: String,
    pub delivery_mode: u8,
    /// Unix seconds.
    pub timestamp: u64,
}

impl MessageProperties {
    pub fn persistent_json(now: DateTime<Utc>) -> Self {
        Self {
            content_type: JSON_CONTENT_TYPE.to_string(),
            delivery_mode: PERSISTENT_DELIVERY_MODE,
            timestamp: now.timestamp().max(0) as u64,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.delivery_mode == PERSISTENT_DELIVERY_MODE
    }
}

/// A fully built message, ready to hand to a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
    /// Ask the broker to return the message instead of dropping it when no
    /// queue is bound for the routing key.
    pub mandatory: bool,
}

impl OutboundMessage {
    pub fn invoice_event(
        exchange: &str,
        event_type: &str,
        body: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange: exchange.to_string(),
            routing_key: routing_key_for(event_type),
            body,
            properties: MessageProperties::persistent_json(now),
            mandatory: true,
        }
    }

    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
