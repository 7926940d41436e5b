//! Service Addresses
//!
//! A service address names where a management server listens:
//! `protocol://host:port/topic`. The protocol selects the broker binding, and
//! the path (minus its leading separator) is the well-known topic clients
//! publish connect requests on. Both sides derive the topic the same way.

use std::fmt;

use crate::error::{Result, TransportError};

/// A parsed management service address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAddress {
    /// Broker binding selector (e.g. "memq")
    pub protocol: String,
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// URL path, leading separator included
    pub path: String,
}

impl ServiceAddress {
    /// Parse an address of the form `protocol://host:port/topic`.
    ///
    /// The path may be empty here; deriving the connect topic is what
    /// rejects topicless addresses, so the failure lands at connector or
    /// listener construction.
    pub fn parse(input: &str) -> Result<Self> {
        let (protocol, rest) = input
            .split_once("://")
            .ok_or_else(|| TransportError::Config(format!("missing protocol in '{}'", input)))?;

        if protocol.is_empty() {
            return Err(TransportError::Config(format!(
                "missing protocol in '{}'",
                input
            )));
        }

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        let (host, port_str) = authority.split_once(':').ok_or_else(|| {
            TransportError::Config(format!("missing port in '{}'", input))
        })?;

        if host.is_empty() {
            return Err(TransportError::Config(format!("missing host in '{}'", input)));
        }

        let port: u16 = port_str
            .parse()
            .map_err(|_| TransportError::Config(format!("invalid port '{}'", port_str)))?;

        Ok(Self {
            protocol: protocol.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// The well-known topic connect requests are published on: the path with
    /// exactly the leading separator removed. An empty topic is a fatal
    /// configuration error.
    pub fn connect_topic(&self) -> Result<&str> {
        let topic = self.path.strip_prefix('/').unwrap_or(&self.path);
        if topic.is_empty() {
            return Err(TransportError::Config(
                "the topic name must be provided in the service address".to_string(),
            ));
        }
        Ok(topic)
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}{}",
            self.protocol, self.host, self.port, self.path
        )
    }
}
