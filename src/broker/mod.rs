//! Broker Seam
//!
//! Object-safe traits the transport talks to instead of a concrete broker.
//! A binding supplies a connection factory; the transport drives it through
//! connections, sessions, consumers and producers, and never assumes anything
//! about the wire underneath. The in-process [`memory`] binding is the
//! reference implementation and backs the test suite.
//!
//! Resource discipline: a session and the consumers/producers created from it
//! are owned by exactly one channel (or by the listener, for its connect
//! subscription) and are not shared across tasks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Credentials;
use crate::envelope::{Envelope, TagSelector};

pub use memory::{MemoryBroker, MemoryConnectionFactory};

pub mod memory;


/// An opaque pub/sub address. Cheap to clone; equality is by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination(Arc<str>);

impl Destination {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Destination {
    fn from(name: &str) -> Self {
        Destination(Arc::from(name))
    }
}

impl From<String> for Destination {
    fn from(name: String) -> Self {
        Destination(Arc::from(name.as_str()))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure reported by a broker binding.
#[derive(Debug)]
pub enum BrokerError {
    /// The binding rejected the supplied credentials
    Unauthorized(String),
    /// The connection, session or endpoint was already torn down
    Closed(String),
    /// Any other binding-specific failure
    Other(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Unauthorized(msg) => write!(f, "unauthorized: {}", msg),
            BrokerError::Closed(msg) => write!(f, "closed: {}", msg),
            BrokerError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Result type for broker binding operations.
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Entry point a binding hands to the transport. The embedder picks the
/// implementation; connectors and listeners only ever see this trait.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a broker connection, authenticating when the binding requires it.
    async fn create_connection(
        &self,
        credentials: Option<&Credentials>,
    ) -> BrokerResult<Box<dyn BrokerConnection>>;
}

/// A live link to the broker. Sessions are created from it; closing it tears
/// down everything created underneath.
#[async_trait]
pub trait BrokerConnection: Send {
    async fn create_session(&self) -> BrokerResult<Box<dyn BrokerSession>>;

    async fn close(&mut self) -> BrokerResult<()>;
}

/// A unit of resource ownership within a connection.
#[async_trait]
pub trait BrokerSession: Send {
    /// Resolve a named, well-known topic.
    async fn create_topic(&self, name: &str) -> BrokerResult<Destination>;

    /// Allocate a broker-generated unique, ephemeral address.
    async fn create_temporary_topic(&self) -> BrokerResult<Destination>;

    /// Subscribe to a destination, optionally filtered broker-side.
    async fn create_consumer(
        &self,
        destination: &Destination,
        selector: Option<TagSelector>,
    ) -> BrokerResult<Box<dyn Consumer>>;

    /// Create a sender bound to a destination.
    async fn create_producer(&self, destination: &Destination) -> BrokerResult<Box<dyn Producer>>;

    async fn close(&mut self) -> BrokerResult<()>;
}

/// The receiving end of a subscription.
#[async_trait]
pub trait Consumer: Send {
    /// Wait for the next envelope. Resolves with an error when the
    /// subscription or its connection is torn down from elsewhere; the caller
    /// bounds the wait.
    async fn receive(&mut self) -> BrokerResult<Envelope>;

    async fn close(&mut self) -> BrokerResult<()>;
}

/// The sending end bound to one destination. Delivery is best-effort and
/// non-durable: with nobody subscribed the envelope is dropped.
#[async_trait]
pub trait Producer: Send {
    async fn send(&self, envelope: Envelope) -> BrokerResult<()>;

    async fn close(&mut self) -> BrokerResult<()>;
}
