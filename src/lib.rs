//! TunnelMQ - request/response tunneling over pub/sub message brokers
//!
//! Lets a management client and a management server exchange framed opaque
//! messages through an existing broker instead of a direct socket. A client
//! publishes a connect request on the server's well-known topic, advertising
//! a private reply destination; the server accepts it and answers over a
//! dedicated per-client channel. The broker itself sits behind a binding
//! trait, so any pub/sub system can carry the tunnel.

pub mod address;
pub mod broker;
pub mod channel;
pub mod config;
pub mod connector;
pub mod envelope;
pub mod error;
pub mod listener;

pub use address::ServiceAddress;
pub use broker::{
    BrokerConnection, BrokerError, BrokerSession, ConnectionFactory, Consumer, Destination,
    MemoryBroker, MemoryConnectionFactory, Producer,
};
pub use channel::{Channel, ChannelState};
pub use config::{Credentials, TransportConfig};
pub use connector::{ClientConnector, ConnectorState};
pub use envelope::{Envelope, TagSelector};
pub use error::TransportError;
pub use listener::ConnectionListener;
