// src/rabbitmq/connection.rs
//
// Lazily established connection + channel pair with topology declared on it.
//
// Readers take the cached session from `slot` without touching `init_lock`.
// Everything that builds, replaces or tears down a session holds `init_lock`,
// so at most one connect sequence runs per manager at a time.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::amqp_client::{AmqpChannel, AmqpConnection, AmqpConnector, ChannelOf};
use super::errors::{BrokerError, RabbitMQError, Result};
use super::message::OutboundMessage;
use super::topology::TopologyDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Ready,
    Failed,
}

/// One connection epoch: a connection, its channel, and the topology declared
/// on that channel.
pub struct Session<C: AmqpConnector> {
    id: String,
    epoch: u64,
    connection: C::Connection,
    channel: ChannelOf<C>,
    // The channel is a single broker session; one publish in flight at a time.
    publish_lock: tokio::sync::Mutex<()>,
}

impl<C: AmqpConnector> Session<C> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn channel(&self) -> &ChannelOf<C> {
        &self.channel
    }

    /// Publish on this session's channel, one message at a time.
    pub async fn publish(
        &self,
        message: &OutboundMessage,
    ) -> std::result::Result<(), BrokerError> {
        let _guard = self.publish_lock.lock().await;
        self.channel.publish(message).await
    }
}

impl<C: AmqpConnector> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("channel_open", &self.channel.is_open())
            .finish_non_exhaustive()
    }
}

struct Slot<C: AmqpConnector> {
    state: ConnectionState,
    session: Option<Arc<Session<C>>>,
    closed: bool,
}

pub struct ConnectionManager<C: AmqpConnector> {
    connector: C,
    topology: TopologyDescriptor,
    slot: Mutex<Slot<C>>,
    init_lock: tokio::sync::Mutex<()>,
    epochs: AtomicU64,
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn run_cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RabbitMQError::Cancelled),
        output = fut => Ok(output),
    }
}

impl<C: AmqpConnector> ConnectionManager<C> {
    pub fn new(connector: C, topology: TopologyDescriptor) -> Self {
        debug!(
            exchange = %topology.exchange_name,
            queue = %topology.queue_name,
            routing_key = %topology.routing_key,
            "Creating connection manager"
        );

        Self {
            connector,
            topology,
            slot: Mutex::new(Slot {
                state: ConnectionState::Uninitialized,
                session: None,
                closed: false,
            }),
            init_lock: tokio::sync::Mutex::new(()),
            epochs: AtomicU64::new(0),
        }
    }

    pub fn topology(&self) -> &TopologyDescriptor {
        &self.topology
    }

    pub fn state(&self) -> ConnectionState {
        self.slot().state
    }

    pub fn is_closed(&self) -> bool {
        self.slot().closed
    }

    /// Whether a session (possibly stale) is still cached.
    pub fn has_session(&self) -> bool {
        self.slot().session.is_some()
    }

    fn slot(&self) -> MutexGuard<'_, Slot<C>> {
        // The slot is plain data; a poisoned lock still holds a usable value.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ready_session(&self) -> Result<Option<Arc<Session<C>>>> {
        let slot = self.slot();
        if slot.closed {
            return Err(RabbitMQError::Closed);
        }
        if slot.state != ConnectionState::Ready {
            return Ok(None);
        }
        Ok(slot
            .session
            .as_ref()
            .filter(|session| session.channel.is_open())
            .cloned())
    }

    /// Return the cached session, connecting and declaring topology first if
    /// there is no usable one.
    pub async fn ensure_ready(&self, cancel: &CancellationToken) -> Result<Arc<Session<C>>> {
        if let Some(session) = self.ready_session()? {
            return Ok(session);
        }

        let _init = run_cancellable(cancel, self.init_lock.lock()).await?;

        // Another caller may have finished while we waited.
        if let Some(session) = self.ready_session()? {
            return Ok(session);
        }

        info!(exchange = %self.topology.exchange_name, "Initializing RabbitMQ connection");

        let stale = {
            let mut slot = self.slot();
            if slot.state == ConnectionState::Ready {
                // Cached as ready but the channel is gone underneath us.
                slot.state = ConnectionState::Failed;
            }
            slot.session.take()
        };
        if let Some(stale) = stale {
            debug!(session_id = %stale.id, "Disposing stale RabbitMQ session");
            self.release(Some(&stale.channel), Some(&stale.connection)).await;
        }

        match self.establish(cancel).await {
            Ok(session) => {
                let session = Arc::new(session);
                {
                    let mut slot = self.slot();
                    slot.state = ConnectionState::Ready;
                    slot.session = Some(Arc::clone(&session));
                }
                info!(
                    session_id = %session.id,
                    epoch = session.epoch,
                    "RabbitMQ connection initialized successfully"
                );
                Ok(session)
            }
            Err(e) => {
                error!(error = %e, "Failed to initialize RabbitMQ connection");
                self.slot().state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    async fn establish(&self, cancel: &CancellationToken) -> Result<Session<C>> {
        let connection = run_cancellable(cancel, self.connector.connect())
            .await?
            .map_err(RabbitMQError::ConnectionError)?;

        let channel = match run_cancellable(cancel, connection.create_channel()).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                self.release(None, Some(&connection)).await;
                return Err(RabbitMQError::ConnectionError(e));
            }
            Err(cancelled) => {
                self.release(None, Some(&connection)).await;
                return Err(cancelled);
            }
        };

        if let Err(e) = self.declare_topology(&channel, cancel).await {
            self.release(Some(&channel), Some(&connection)).await;
            return Err(e);
        }

        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Session {
            id: format!("session-{}", &Uuid::new_v4().to_string()[..8]),
            epoch,
            connection,
            channel,
            publish_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn declare_topology(
        &self,
        channel: &ChannelOf<C>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let exchange = self.topology.exchange();
        run_cancellable(cancel, channel.declare_exchange(&exchange))
            .await?
            .map_err(RabbitMQError::ConnectionError)?;
        debug!(exchange = %exchange.name, kind = %exchange.kind, "Declared exchange");

        let queue = self.topology.queue();
        run_cancellable(cancel, channel.declare_queue(&queue))
            .await?
            .map_err(RabbitMQError::ConnectionError)?;

        let binding = self.topology.binding();
        run_cancellable(cancel, channel.bind_queue(&binding))
            .await?
            .map_err(RabbitMQError::ConnectionError)?;
        debug!(
            queue = %binding.queue,
            exchange = %binding.exchange,
            routing_key = %binding.routing_key,
            "Bound queue"
        );

        Ok(())
    }

    /// Close whatever handles are given. Failures are logged, never returned.
    async fn release(&self, channel: Option<&ChannelOf<C>>, connection: Option<&C::Connection>) {
        if let Some(channel) = channel {
            if let Err(e) = channel.close().await {
                warn!(error = %e, "Error closing RabbitMQ channel during cleanup");
            }
        }
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                warn!(error = %e, "Error closing RabbitMQ connection during cleanup");
            }
        }
    }

    /// Force the next [`ensure_ready`](Self::ensure_ready) to reconnect.
    ///
    /// The cached handles stay in place until that call disposes of them.
    pub fn invalidate(&self) {
        let mut slot = self.slot();
        if slot.state == ConnectionState::Ready {
            slot.state = ConnectionState::Failed;
        }
    }

    /// Like [`invalidate`](Self::invalidate), but only while `session` is still
    /// the cached one. A failure on an already replaced session is ignored.
    pub fn invalidate_session(&self, session: &Arc<Session<C>>) {
        let mut slot = self.slot();
        let current = slot
            .session
            .as_ref()
            .map_or(false, |cached| Arc::ptr_eq(cached, session));
        if current && slot.state == ConnectionState::Ready {
            debug!(session_id = %session.id, "Invalidating RabbitMQ session");
            slot.state = ConnectionState::Failed;
        }
    }

    /// Tear down the connection and refuse all later calls. Idempotent.
    pub async fn close(&self) {
        if self.is_closed() {
            return;
        }

        let _init = self.init_lock.lock().await;
        let session = {
            let mut slot = self.slot();
            if slot.closed {
                return;
            }
            slot.closed = true;
            slot.state = ConnectionState::Uninitialized;
            slot.session.take()
        };

        if let Some(session) = session {
            self.release(Some(&session.channel), Some(&session.connection)).await;
        }
        info!(exchange = %self.topology.exchange_name, "RabbitMQ connection manager closed");
    }
}
