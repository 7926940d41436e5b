//! Transport error types.
//!
//! Every operation in this crate fails with a [`TransportError`]. The four
//! variants are deliberately coarse so callers can branch on condition:
//! configuration problems are fatal and never retried, broker failures carry
//! the underlying cause, timeouts are distinct from broken links, and using a
//! closed channel is reported rather than ignored.

use std::fmt;

use crate::broker::BrokerError;

/// Errors surfaced by channels, connectors and listeners.
#[derive(Debug)]
pub enum TransportError {
    /// Malformed service address or missing required configuration
    Config(String),
    /// Failure in the underlying broker binding, wrapping its cause
    Broker(BrokerError),
    /// No message arrived within the configured receive window
    Timeout,
    /// Operation on a closed channel, or before its send side was bound
    Closed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Config(msg) => write!(f, "configuration error: {}", msg),
            TransportError::Broker(e) => write!(f, "broker error: {}", e),
            TransportError::Timeout => write!(f, "receive timeout expired"),
            TransportError::Closed(msg) => write!(f, "connection closed: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Broker(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BrokerError> for TransportError {
    fn from(err: BrokerError) -> Self {
        TransportError::Broker(err)
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
