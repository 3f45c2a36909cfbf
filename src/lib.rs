//! Invoice event publishing over RabbitMQ.
//!
//! [`rabbitmq::ConnectionManager`] owns one lazily opened connection and
//! channel, declares the invoice exchange/queue/binding on it, and rebuilds
//! both after a failure. [`rabbitmq::EventPublisher`] turns
//! `publish("Paid", &invoice)` into a persistent JSON message routed as
//! `invoice.paid`.

pub mod config;
pub mod env;
pub mod rabbitmq;

pub use rabbitmq::{
    ConnectionManager, EventPublisher, InvoiceEventPublisher, InvoiceEventType, RabbitMQError,
    TopologyDescriptor,
};
