//! Client Connector
//!
//! Drives the client side of the handshake: open a private reply channel,
//! publish a connect request carrying its address on the server's well-known
//! topic, and hand steady-state traffic to the channel. Connecting does not
//! wait for the server; the first receive is what confirms anybody is
//! listening, bounded by the connect timeout.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use crate::address::ServiceAddress;
use crate::broker::{BrokerConnection, ConnectionFactory};
use crate::channel::Channel;
use crate::config::TransportConfig;
use crate::error::{Result, TransportError};

/// Lifecycle of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// Constructed, not yet connected
    Idle,
    /// Handshake in progress
    Connecting,
    /// Connected; channel traffic may flow
    Open,
    /// Terminal
    Closed,
}

/// Client endpoint of the tunnel.
pub struct ClientConnector {
    factory: Arc<dyn ConnectionFactory>,
    address: ServiceAddress,
    topic: String,
    config: TransportConfig,
    connection: Option<Box<dyn BrokerConnection>>,
    channel: Option<Channel>,
    state: ConnectorState,
}

impl ClientConnector {
    /// Build a connector for the given service address. Fails here, not at
    /// connect time, when the address carries no topic.
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        address: ServiceAddress,
        config: TransportConfig,
    ) -> Result<Self> {
        let topic = address.connect_topic()?.to_string();
        Ok(Self {
            factory,
            address,
            topic,
            config,
            connection: None,
            channel: None,
            state: ConnectorState::Idle,
        })
    }

    pub fn state(&self) -> ConnectorState {
        self.state
    }

    /// The service address this connector targets.
    pub fn address(&self) -> &ServiceAddress {
        &self.address
    }

    /// Diagnostic identifier of the underlying channel, once connected.
    pub fn channel_id(&self) -> Option<Uuid> {
        self.channel.as_ref().map(Channel::id)
    }

    /// The private reply destination announced in the connect request, once
    /// connected.
    pub fn local_destination(&self) -> Option<&crate::broker::Destination> {
        self.channel.as_ref().and_then(Channel::local_destination)
    }

    /// Establish the broker link and announce this client on the well-known
    /// topic. Returns once the connect request is published; the server's
    /// answer is only awaited by the first [`receive`](Self::receive), which
    /// runs under the configured connect timeout.
    ///
    /// Broker failures are wrapped and surfaced; nothing is retried here.
    ///
    /// # Panics
    ///
    /// Panics when called on a connector that already connected; reconnecting
    /// a used connector is a programming error.
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectorState::Idle => {}
            ConnectorState::Closed => {
                return Err(TransportError::Closed("connector is closed".to_string()))
            }
            ConnectorState::Connecting | ConnectorState::Open => {
                panic!("connector to {} connected twice", self.address)
            }
        }

        self.state = ConnectorState::Connecting;
        match self.handshake().await {
            Ok(()) => {
                self.state = ConnectorState::Open;
                info!(
                    address = %self.address,
                    channel = %self.channel.as_ref().map(Channel::id).unwrap_or_default(),
                    "connected"
                );
                Ok(())
            }
            Err(e) => {
                warn!(address = %self.address, error = %e, "connect failed");
                // Best-effort teardown of whatever was created.
                if let Some(mut channel) = self.channel.take() {
                    let _ = channel.close().await;
                }
                if let Some(mut connection) = self.connection.take() {
                    let _ = connection.close().await;
                }
                self.state = ConnectorState::Closed;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let connection = self
            .factory
            .create_connection(self.config.credentials.as_ref())
            .await?;
        let session = connection.create_session().await?;
        self.connection = Some(connection);

        // Private reply channel; the peer is unknown until the server's first
        // answer names its own destination.
        let mut channel = Channel::new(session);
        channel.set_receive_timeout(self.config.receive_timeout());

        if let Err(e) = channel.open(None, None).await {
            let _ = channel.close().await;
            return Err(e);
        }
        if let Err(e) = channel.publish_connect_request(&self.topic).await {
            let _ = channel.close().await;
            return Err(e);
        }

        // Only the next receive runs under the short window.
        channel.set_handshake_timeout(self.config.connect_timeout());
        self.channel = Some(channel);
        Ok(())
    }

    fn channel_mut(&mut self) -> Result<&mut Channel> {
        match self.state {
            ConnectorState::Open => {}
            _ => {
                return Err(TransportError::Closed(
                    "connector is not connected".to_string(),
                ))
            }
        }
        self.channel
            .as_mut()
            .ok_or_else(|| TransportError::Closed("connector is not connected".to_string()))
    }

    /// Send an opaque payload to the server.
    pub async fn send(&mut self, payload: Bytes) -> Result<()> {
        self.channel_mut()?.send(payload).await
    }

    /// Wait for the next payload from the server. The first call after
    /// [`connect`](Self::connect) is bounded by the connect timeout; every
    /// later call by the steady-state receive timeout.
    pub async fn receive(&mut self) -> Result<Bytes> {
        self.channel_mut()?.receive().await
    }

    /// Release channel then broker connection, best-effort; each step is
    /// attempted regardless of earlier failures and the last error is
    /// reported.
    pub async fn close(&mut self) -> Result<()> {
        let mut last_err: Option<TransportError> = None;

        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                warn!(address = %self.address, error = %e, "channel close failed");
                last_err = Some(e);
            }
        }
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                warn!(address = %self.address, error = %e, "connection close failed");
                last_err = Some(e.into());
            }
        }

        self.state = ConnectorState::Closed;
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
