// src/rabbitmq/topology.rs
// Exchange/queue/binding layout declared on every fresh channel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange, queue and binding pattern for the invoice event stream.
///
/// Supplied once when the connection manager is built and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDescriptor {
    #[serde(default = "default_exchange_name")]
    pub exchange_name: String,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    /// Topic pattern used to bind the queue, e.g. `invoice.*`.
    #[serde(default = "default_routing_key")]
    pub routing_key: String,
}

pub(crate) fn default_exchange_name() -> String { "invoices".to_string() }
pub(crate) fn default_queue_name() -> String { "invoice_events".to_string() }
pub(crate) fn default_routing_key() -> String { "invoice.*".to_string() }

impl Default for TopologyDescriptor {
    fn default() -> Self {
        Self {
            exchange_name: default_exchange_name(),
            queue_name: default_queue_name(),
            routing_key: default_routing_key(),
        }
    }
}

impl TopologyDescriptor {
    pub fn new(
        exchange_name: impl Into<String>,
        queue_name: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange_name: exchange_name.into(),
            queue_name: queue_name.into(),
            routing_key: routing_key.into(),
        }
    }

    pub fn exchange(&self) -> ExchangeDeclaration {
        ExchangeDeclaration {
            name: self.exchange_name.clone(),
            kind: ExchangeType::Topic,
            durable: true,
            auto_delete: false,
        }
    }

    pub fn queue(&self) -> QueueDeclaration {
        QueueDeclaration {
            name: self.queue_name.clone(),
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }

    pub fn binding(&self) -> QueueBinding {
        QueueBinding {
            queue: self.queue_name.clone(),
            exchange: self.exchange_name.clone(),
            routing_key: self.routing_key.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeType {
    Topic,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Topic => "topic",
        }
    }
}

impl fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDeclaration {
    pub name: String,
    pub kind: ExchangeType,
    pub durable: bool,
    pub auto_delete: bool,
}

/// Queue declared without extra arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_are_durable_topic_layout() {
        let topology = TopologyDescriptor::new("billing", "billing_events", "invoice.#");

        let exchange = topology.exchange();
        assert_eq!(exchange.name, "billing");
        assert_eq!(exchange.kind, ExchangeType::Topic);
        assert!(exchange.durable);
        assert!(!exchange.auto_delete);

        let queue = topology.queue();
        assert_eq!(queue.name, "billing_events");
        assert!(queue.durable);
        assert!(!queue.exclusive);
        assert!(!queue.auto_delete);

        assert_eq!(
            topology.binding(),
            QueueBinding {
                queue: "billing_events".to_string(),
                exchange: "billing".to_string(),
                routing_key: "invoice.#".to_string(),
            }
        );
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let topology: TopologyDescriptor =
            serde_json::from_str(r#"{ "queue_name": "audit" }"#).unwrap();
        assert_eq!(topology.exchange_name, "invoices");
        assert_eq!(topology.queue_name, "audit");
        assert_eq!(topology.routing_key, "invoice.*");
    }
}
