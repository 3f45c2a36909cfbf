// src/env.rs
use anyhow::{Context, Result};
use dotenv::dotenv;
use std::env;
use std::time::Duration;

use crate::config::{default_uri, ConnectionConfig, InvoiceRabbitConfig};
use crate::rabbitmq::topology::{default_exchange_name, default_queue_name, default_routing_key};
use crate::rabbitmq::TopologyDescriptor;

#[derive(Debug, Clone)]
pub struct Config {
    pub amqp_addr: String,
    pub exchange_name: String,
    pub queue_name: String,
    pub routing_key: String,
    pub rabbitmq_connect_timeout_seconds: u64,
}

fn default_connect_timeout_seconds() -> u64 {
    5
}

impl Config {
    /// Read from the process environment, after loading `.env` if present.
    pub fn load() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Config {
            amqp_addr: non_empty("AMQP_ADDR").unwrap_or_else(default_uri),
            exchange_name: non_empty("RMQ_EXCHANGE_NAME").unwrap_or_else(default_exchange_name),
            queue_name: non_empty("RMQ_QUEUE_NAME").unwrap_or_else(default_queue_name),
            routing_key: non_empty("RMQ_ROUTING_KEY").unwrap_or_else(default_routing_key),
            rabbitmq_connect_timeout_seconds: match non_empty("RABBITMQ_CONNECT_TIMEOUT_SECONDS") {
                Some(val) => val
                    .trim()
                    .parse()
                    .context("RABBITMQ_CONNECT_TIMEOUT_SECONDS must be a whole number of seconds")?,
                None => default_connect_timeout_seconds(),
            },
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.rabbitmq_connect_timeout_seconds)
    }

    pub fn topology(&self) -> TopologyDescriptor {
        TopologyDescriptor::new(&self.exchange_name, &self.queue_name, &self.routing_key)
    }
}

impl From<Config> for InvoiceRabbitConfig {
    fn from(config: Config) -> Self {
        let topology = config.topology();
        InvoiceRabbitConfig {
            connection: ConnectionConfig {
                uri: config.amqp_addr,
                connection_timeout_ms: config.rabbitmq_connect_timeout_seconds * 1000,
            },
            topology,
        }
    }
}
