// src/rabbitmq/publisher.rs
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::amqp_client::AmqpConnector;
use super::connection::{run_cancellable, ConnectionManager, Session};
use super::diagnostics::format_message_as_json_or_text;
use super::errors::{RabbitMQError, Result};
use super::message::OutboundMessage;

/// What the invoice CRUD layer depends on: publish one event after a
/// committed mutation, fail if the event could not be handed to the broker.
#[async_trait]
pub trait InvoiceEventPublisher: Send + Sync {
    async fn publish_invoice_event(
        &self,
        event_type: &str,
        data: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

pub struct EventPublisher<C: AmqpConnector> {
    manager: Arc<ConnectionManager<C>>,
}

impl<C: AmqpConnector> Clone for EventPublisher<C> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<C: AmqpConnector> EventPublisher<C> {
    pub fn new(manager: Arc<ConnectionManager<C>>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<C>> {
        &self.manager
    }

    /// Publish `payload` as JSON with routing key `invoice.<event_type>`.
    ///
    /// Any failure after a session was obtained invalidates it, so the next
    /// call reconnects. Nothing is retried here.
    pub async fn publish<T>(
        &self,
        event_type: &str,
        payload: &T,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        T: Serialize + ?Sized + Sync,
    {
        if event_type.trim().is_empty() {
            return Err(RabbitMQError::InvalidEventType(event_type.to_string()));
        }

        let session = self.manager.ensure_ready(cancel).await.map_err(|e| {
            error!(event_type, error = %e, "Failed to obtain RabbitMQ channel");
            e
        })?;

        match self.publish_on(&session, event_type, payload, cancel).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    event_type,
                    session_id = %session.id(),
                    error = %e,
                    "Failed to publish {} message", event_type
                );
                self.manager.invalidate_session(&session);
                Err(e)
            }
        }
    }

    async fn publish_on<T>(
        &self,
        session: &Session<C>,
        event_type: &str,
        payload: &T,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        T: Serialize + ?Sized + Sync,
    {
        let body = serde_json::to_vec(payload)?;
        let message = OutboundMessage::invoice_event(
            &self.manager.topology().exchange_name,
            event_type,
            body,
            chrono::Utc::now(),
        );

        let body_text = message.body_text();
        let formatted = format_message_as_json_or_text(&body_text);
        if formatted.structured {
            info!(
                routing_key = %message.routing_key,
                "Publishing JSON message:\n{}", formatted.text
            );
        } else {
            debug!(routing_key = %message.routing_key, body = %formatted.text, "Publishing message");
        }

        run_cancellable(cancel, session.publish(&message))
            .await?
            .map_err(RabbitMQError::PublishError)
    }

    /// Close the underlying connection manager.
    pub async fn close(&self) {
        self.manager.close().await;
    }
}

#[async_trait]
impl<C: AmqpConnector> InvoiceEventPublisher for EventPublisher<C> {
    async fn publish_invoice_event(
        &self,
        event_type: &str,
        data: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.publish(event_type, data, cancel).await
    }
}
