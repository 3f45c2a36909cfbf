// src/rabbitmq/amqp_client.rs
//
// The broker-facing seam. The connection manager only talks to these traits;
// `LapinConnector` is the implementation used against a real RabbitMQ.

use async_trait::async_trait;
use lapin::{
    options::{
        BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use std::time::Duration;
use tracing::debug;

use super::errors::BrokerError;
use super::message::OutboundMessage;
use super::topology::{ExchangeDeclaration, ExchangeType, QueueBinding, QueueDeclaration};

/// Opens connections to the broker.
#[async_trait]
pub trait AmqpConnector: Send + Sync + 'static {
    type Connection: AmqpConnection;

    async fn connect(&self) -> Result<Self::Connection, BrokerError>;
}

/// A live broker connection.
#[async_trait]
pub trait AmqpConnection: Send + Sync + 'static {
    type Channel: AmqpChannel;

    async fn create_channel(&self) -> Result<Self::Channel, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// A channel multiplexed over an [`AmqpConnection`].
#[async_trait]
pub trait AmqpChannel: Send + Sync + 'static {
    async fn declare_exchange(&self, exchange: &ExchangeDeclaration) -> Result<(), BrokerError>;

    async fn declare_queue(&self, queue: &QueueDeclaration) -> Result<(), BrokerError>;

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), BrokerError>;

    /// Publish and wait until the broker has accepted the message.
    async fn publish(&self, message: &OutboundMessage) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;

    /// `false` once the broker or the client has closed the channel.
    fn is_open(&self) -> bool;
}

pub type ChannelOf<C> = <<C as AmqpConnector>::Connection as AmqpConnection>::Channel;

/// Connection settings for [`LapinConnector`]
#[derive(Debug, Clone)]
pub struct LapinConfig {
    pub uri: String,
    pub connect_timeout: Duration,
}

impl LapinConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

pub struct LapinConnector {
    config: LapinConfig,
}

impl LapinConnector {
    pub fn new(config: LapinConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AmqpConnector for LapinConnector {
    type Connection = LapinConnection;

    async fn connect(&self) -> Result<Self::Connection, BrokerError> {
        debug!(
            timeout_ms = self.config.connect_timeout.as_millis() as u64,
            "Connecting to RabbitMQ"
        );
        let connection = tokio::time::timeout(
            self.config.connect_timeout,
            Connection::connect(&self.config.uri, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| BrokerError::Timeout(self.config.connect_timeout))??;

        Ok(LapinConnection { inner: connection })
    }
}

pub struct LapinConnection {
    inner: Connection,
}

#[async_trait]
impl AmqpConnection for LapinConnection {
    type Channel = LapinChannel;

    async fn create_channel(&self) -> Result<Self::Channel, BrokerError> {
        let channel = self.inner.create_channel().await?;

        // Mandatory returns only reach the publisher through confirms.
        debug!(channel_id = channel.id(), "Enabling confirm mode");
        if let Err(e) = channel.confirm_select(ConfirmSelectOptions::default()).await {
            // Don't leave a half-configured channel open on the connection.
            let _ = channel.close(200, "confirm_select failed").await;
            return Err(e.into());
        }

        Ok(LapinChannel { inner: channel })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.inner.status().connected() {
            return Ok(());
        }
        self.inner.close(200, "Closing connection").await?;
        Ok(())
    }
}

pub struct LapinChannel {
    inner: Channel,
}

fn exchange_kind(kind: ExchangeType) -> ExchangeKind {
    match kind {
        ExchangeType::Topic => ExchangeKind::Topic,
    }
}

/// Map a publisher confirm onto the publish outcome. A mandatory message the
/// broker could not route comes back acked but with the returned message.
fn confirmation_result(confirmation: Confirmation) -> Result<(), BrokerError> {
    match confirmation {
        Confirmation::Ack(None) | Confirmation::NotRequested => Ok(()),
        Confirmation::Ack(Some(returned)) => Err(BrokerError::Returned {
            reply_code: returned.reply_code,
            reply_text: returned.reply_text.as_str().to_string(),
        }),
        Confirmation::Nack(_) => Err(BrokerError::Nacked),
    }
}

fn basic_properties(message: &OutboundMessage) -> BasicProperties {
    BasicProperties::default()
        .with_content_type(message.properties.content_type.clone().into())
        .with_delivery_mode(message.properties.delivery_mode)
        .with_timestamp(message.properties.timestamp)
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn declare_exchange(&self, exchange: &ExchangeDeclaration) -> Result<(), BrokerError> {
        self.inner
            .exchange_declare(
                &exchange.name,
                exchange_kind(exchange.kind),
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    auto_delete: exchange.auto_delete,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn declare_queue(&self, queue: &QueueDeclaration) -> Result<(), BrokerError> {
        let declared = self
            .inner
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    exclusive: queue.exclusive,
                    auto_delete: queue.auto_delete,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        debug!(queue = %queue.name, messages = declared.message_count(), "Declared queue");
        Ok(())
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), BrokerError> {
        self.inner
            .queue_bind(
                &binding.queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<(), BrokerError> {
        let confirm = self
            .inner
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions {
                    mandatory: message.mandatory,
                    ..BasicPublishOptions::default()
                },
                &message.body,
                basic_properties(message),
            )
            .await?;

        confirmation_result(confirm.await?)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.inner.status().connected() {
            return Ok(());
        }
        self.inner.close(200, "Closing channel").await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }
}
