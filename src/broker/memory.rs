//! In-Process Broker Binding
//!
//! A minimal pub/sub broker living inside the process: a topic registry with
//! per-subscription delivery queues and delivery-time tag filtering. It
//! implements the full broker seam, which makes it both the reference for
//! binding authors and the backend for the test suite.
//!
//! Delivery is non-durable: publishing to a topic nobody subscribes to drops
//! the envelope. Per-topic order is preserved per publisher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::config::Credentials;
use crate::envelope::{Envelope, TagSelector};

use super::{
    BrokerConnection, BrokerError, BrokerResult, BrokerSession, ConnectionFactory, Consumer,
    Destination, Producer,
};

/// One registered subscription on a topic.
struct Subscriber {
    id: Uuid,
    selector: Option<TagSelector>,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// The shared broker core.
pub struct MemoryBroker {
    /// Subscribers per destination name
    topics: DashMap<String, Vec<Subscriber>>,
    /// Credentials every connection must present, when set
    required_credentials: Option<Credentials>,
    /// Set once the broker is shut down
    closed: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            topics: DashMap::new(),
            required_credentials: None,
            closed: AtomicBool::new(false),
        })
    }

    /// A broker that rejects connections not presenting these credentials.
    pub fn with_credentials(username: impl Into<String>, password: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            topics: DashMap::new(),
            required_credentials: Some(Credentials {
                username: username.into(),
                password: password.into(),
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Tear the broker down. Every queued subscription is dropped, which
    /// releases blocked receives with an error.
    pub fn shut_down(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.topics.clear();
        debug!("memory broker shut down");
    }

    fn check_open(&self) -> BrokerResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed("broker shut down".to_string()));
        }
        Ok(())
    }

    fn authorize(&self, credentials: Option<&Credentials>) -> BrokerResult<()> {
        match (&self.required_credentials, credentials) {
            (None, _) => Ok(()),
            (Some(required), Some(supplied))
                if required.username == supplied.username
                    && required.password == supplied.password =>
            {
                Ok(())
            }
            (Some(_), Some(supplied)) => Err(BrokerError::Unauthorized(format!(
                "bad credentials for user '{}'",
                supplied.username
            ))),
            (Some(_), None) => Err(BrokerError::Unauthorized(
                "credentials required".to_string(),
            )),
        }
    }

    fn subscribe(
        &self,
        destination: &Destination,
        selector: Option<TagSelector>,
    ) -> BrokerResult<(Uuid, mpsc::UnboundedReceiver<Envelope>)> {
        self.check_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.topics
            .entry(destination.name().to_string())
            .or_default()
            .push(Subscriber { id, selector, tx });
        debug!(destination = %destination, subscription = %id, "subscribed");
        Ok((id, rx))
    }

    fn unsubscribe(&self, destination: &Destination, id: Uuid) {
        if let Some(mut subscribers) = self.topics.get_mut(destination.name()) {
            subscribers.retain(|s| s.id != id);
        }
    }

    fn publish(&self, destination: &Destination, envelope: Envelope) -> BrokerResult<()> {
        self.check_open()?;
        let Some(mut subscribers) = self.topics.get_mut(destination.name()) else {
            // Non-durable: nobody listening, nothing kept.
            return Ok(());
        };
        subscribers.retain(|s| {
            let wanted = s
                .selector
                .as_ref()
                .map(|sel| sel.matches(&envelope))
                .unwrap_or(true);
            if !wanted {
                return !s.tx.is_closed();
            }
            s.tx.send(envelope.clone()).is_ok()
        });
        Ok(())
    }
}

/// Factory handed to connectors and listeners.
pub struct MemoryConnectionFactory {
    broker: Arc<MemoryBroker>,
}

impl MemoryConnectionFactory {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn create_connection(
        &self,
        credentials: Option<&Credentials>,
    ) -> BrokerResult<Box<dyn BrokerConnection>> {
        self.broker.check_open()?;
        self.broker.authorize(credentials)?;
        Ok(Box::new(MemoryConnection {
            broker: self.broker.clone(),
            closed: false,
        }))
    }
}

struct MemoryConnection {
    broker: Arc<MemoryBroker>,
    closed: bool,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn create_session(&self) -> BrokerResult<Box<dyn BrokerSession>> {
        if self.closed {
            return Err(BrokerError::Closed("connection closed".to_string()));
        }
        self.broker.check_open()?;
        Ok(Box::new(MemorySession {
            broker: self.broker.clone(),
            closed: false,
        }))
    }

    async fn close(&mut self) -> BrokerResult<()> {
        self.closed = true;
        Ok(())
    }
}

struct MemorySession {
    broker: Arc<MemoryBroker>,
    closed: bool,
}

impl MemorySession {
    fn check_open(&self) -> BrokerResult<()> {
        if self.closed {
            return Err(BrokerError::Closed("session closed".to_string()));
        }
        self.broker.check_open()
    }
}

#[async_trait]
impl BrokerSession for MemorySession {
    async fn create_topic(&self, name: &str) -> BrokerResult<Destination> {
        self.check_open()?;
        Ok(Destination::from(name))
    }

    async fn create_temporary_topic(&self) -> BrokerResult<Destination> {
        self.check_open()?;
        Ok(Destination::from(format!("$tmp/{}", Uuid::new_v4())))
    }

    async fn create_consumer(
        &self,
        destination: &Destination,
        selector: Option<TagSelector>,
    ) -> BrokerResult<Box<dyn Consumer>> {
        self.check_open()?;
        let (id, rx) = self.broker.subscribe(destination, selector)?;
        Ok(Box::new(MemoryConsumer {
            broker: self.broker.clone(),
            destination: destination.clone(),
            id,
            rx,
            closed: false,
        }))
    }

    async fn create_producer(&self, destination: &Destination) -> BrokerResult<Box<dyn Producer>> {
        self.check_open()?;
        Ok(Box::new(MemoryProducer {
            broker: self.broker.clone(),
            destination: destination.clone(),
            closed: false,
        }))
    }

    async fn close(&mut self) -> BrokerResult<()> {
        self.closed = true;
        Ok(())
    }
}

struct MemoryConsumer {
    broker: Arc<MemoryBroker>,
    destination: Destination,
    id: Uuid,
    rx: mpsc::UnboundedReceiver<Envelope>,
    closed: bool,
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn receive(&mut self) -> BrokerResult<Envelope> {
        if self.closed {
            return Err(BrokerError::Closed("consumer closed".to_string()));
        }
        match self.rx.recv().await {
            Some(envelope) => Ok(envelope),
            None => Err(BrokerError::Closed(
                "subscription torn down".to_string(),
            )),
        }
    }

    async fn close(&mut self) -> BrokerResult<()> {
        if !self.closed {
            self.broker.unsubscribe(&self.destination, self.id);
            self.closed = true;
        }
        Ok(())
    }
}

struct MemoryProducer {
    broker: Arc<MemoryBroker>,
    destination: Destination,
    closed: bool,
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn send(&self, envelope: Envelope) -> BrokerResult<()> {
        if self.closed {
            return Err(BrokerError::Closed("producer closed".to_string()));
        }
        self.broker.publish(&self.destination, envelope)
    }

    async fn close(&mut self) -> BrokerResult<()> {
        self.closed = true;
        Ok(())
    }
}
