// In-memory broker implementing the AMQP client traits, with switches to
// inject failures, delays and hangs at each step.
#![allow(dead_code)]

use async_trait::async_trait;
use invoice_rabbitmq::rabbitmq::amqp_client::{AmqpChannel, AmqpConnection, AmqpConnector};
use invoice_rabbitmq::rabbitmq::topology::{ExchangeDeclaration, QueueBinding, QueueDeclaration};
use invoice_rabbitmq::rabbitmq::{
    BrokerError, ConnectionManager, EventPublisher, OutboundMessage, TopologyDescriptor,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct BrokerLog {
    pub connects: AtomicUsize,
    pub channels_opened: AtomicUsize,
    pub channels_closed: AtomicUsize,
    pub connections_closed: AtomicUsize,
    pub exchanges: Mutex<Vec<ExchangeDeclaration>>,
    pub queues: Mutex<Vec<QueueDeclaration>>,
    pub bindings: Mutex<Vec<QueueBinding>>,
    pub published: Mutex<Vec<OutboundMessage>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl BrokerLog {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn channels_closed(&self) -> usize {
        self.channels_closed.load(Ordering::SeqCst)
    }

    pub fn connections_closed(&self) -> usize {
        self.connections_closed.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().unwrap().clone()
    }
}

/// Each `fail_*` counter makes that many upcoming calls fail.
#[derive(Default)]
pub struct Faults {
    pub fail_connect: AtomicUsize,
    pub fail_channel: AtomicUsize,
    pub fail_exchange: AtomicUsize,
    pub fail_queue: AtomicUsize,
    pub fail_bind: AtomicUsize,
    pub fail_publish: AtomicUsize,
    pub fail_close: AtomicUsize,
    pub hang_queue_declare: AtomicBool,
    pub connect_delay_ms: AtomicUsize,
    pub publish_delay_ms: AtomicUsize,
}

impl Faults {
    pub fn fail_next(counter: &AtomicUsize, times: usize) {
        counter.store(times, Ordering::SeqCst);
    }

    fn should_fail(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn delay(ms: &AtomicUsize) {
        let ms = ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub log: Arc<BrokerLog>,
    pub faults: Arc<Faults>,
}

#[async_trait]
impl AmqpConnector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self) -> Result<Self::Connection, BrokerError> {
        Faults::delay(&self.faults.connect_delay_ms).await;
        if Faults::should_fail(&self.faults.fail_connect) {
            return Err("connection refused".into());
        }
        let id = self.log.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeConnection {
            id,
            log: Arc::clone(&self.log),
            faults: Arc::clone(&self.faults),
        })
    }
}

pub struct FakeConnection {
    pub id: usize,
    log: Arc<BrokerLog>,
    faults: Arc<Faults>,
}

#[async_trait]
impl AmqpConnection for FakeConnection {
    type Channel = FakeChannel;

    async fn create_channel(&self) -> Result<Self::Channel, BrokerError> {
        if Faults::should_fail(&self.faults.fail_channel) {
            return Err("channel open refused".into());
        }
        self.log.channels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeChannel {
            connection_id: self.id,
            open: Arc::new(AtomicBool::new(true)),
            log: Arc::clone(&self.log),
            faults: Arc::clone(&self.faults),
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.log.connections_closed.fetch_add(1, Ordering::SeqCst);
        if Faults::should_fail(&self.faults.fail_close) {
            return Err("connection already gone".into());
        }
        Ok(())
    }
}

pub struct FakeChannel {
    pub connection_id: usize,
    pub open: Arc<AtomicBool>,
    log: Arc<BrokerLog>,
    faults: Arc<Faults>,
}

#[async_trait]
impl AmqpChannel for FakeChannel {
    async fn declare_exchange(&self, exchange: &ExchangeDeclaration) -> Result<(), BrokerError> {
        if Faults::should_fail(&self.faults.fail_exchange) {
            return Err("PRECONDITION_FAILED - inequivalent arg 'type'".into());
        }
        self.log.exchanges.lock().unwrap().push(exchange.clone());
        Ok(())
    }

    async fn declare_queue(&self, queue: &QueueDeclaration) -> Result<(), BrokerError> {
        if self.faults.hang_queue_declare.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if Faults::should_fail(&self.faults.fail_queue) {
            return Err("ACCESS_REFUSED".into());
        }
        self.log.queues.lock().unwrap().push(queue.clone());
        Ok(())
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), BrokerError> {
        if Faults::should_fail(&self.faults.fail_bind) {
            return Err("NOT_FOUND - no exchange".into());
        }
        self.log.bindings.lock().unwrap().push(binding.clone());
        Ok(())
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<(), BrokerError> {
        let now = self.log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_in_flight.fetch_max(now, Ordering::SeqCst);

        Faults::delay(&self.faults.publish_delay_ms).await;
        let result = if !self.open.load(Ordering::SeqCst) {
            Err("channel closed".into())
        } else if Faults::should_fail(&self.faults.fail_publish) {
            Err(BrokerError::Returned {
                reply_code: 312,
                reply_text: "NO_ROUTE".to_string(),
            })
        } else {
            self.log.published.lock().unwrap().push(message.clone());
            Ok(())
        };

        self.log.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.open.store(false, Ordering::SeqCst);
        self.log.channels_closed.fetch_add(1, Ordering::SeqCst);
        if Faults::should_fail(&self.faults.fail_close) {
            return Err("channel already closed".into());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

pub fn topology() -> TopologyDescriptor {
    TopologyDescriptor::new("invoices", "invoice_events", "invoice.*")
}

pub fn manager() -> (Arc<ConnectionManager<FakeConnector>>, FakeConnector) {
    let connector = FakeConnector::default();
    let manager = Arc::new(ConnectionManager::new(connector.clone(), topology()));
    (manager, connector)
}

pub fn publisher() -> (EventPublisher<FakeConnector>, FakeConnector) {
    let (manager, connector) = manager();
    (EventPublisher::new(manager), connector)
}
