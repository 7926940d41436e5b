//! Connection Listener
//!
//! The server acceptor. Subscribes to the well-known topic with a broker-side
//! filter selecting only connect requests, so the accept loop never sees
//! application traffic, and turns each accepted request into a fresh channel
//! bound to the requester's advertised reply destination.
//!
//! `accept` is meant to run in a loop on one acceptor task; each returned
//! channel is handed to its own worker so a slow client cannot block the next
//! accept. The listener keeps no reference to accepted channels.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::address::ServiceAddress;
use crate::broker::{BrokerConnection, BrokerError, BrokerSession, ConnectionFactory, Consumer};
use crate::channel::Channel;
use crate::config::TransportConfig;
use crate::envelope::TagSelector;
use crate::error::{Result, TransportError};

/// Server-side acceptor bound to one service address.
pub struct ConnectionListener {
    factory: Arc<dyn ConnectionFactory>,
    address: ServiceAddress,
    topic: String,
    config: TransportConfig,
    connection: Option<Box<dyn BrokerConnection>>,
    session: Option<Box<dyn BrokerSession>>,
    consumer: Option<Box<dyn Consumer>>,
}

impl ConnectionListener {
    /// Build a listener for the given service address. Fails here when the
    /// address carries no topic.
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
            session: None,
            consumer: None,
        })
    }

    /// The service address this listener is bound to.
    pub fn address(&self) -> &ServiceAddress {
        &self.address
    }

    /// Create the broker connection and the filtered connect subscription.
    /// Lazy and idempotent: each resource is created at most once, and
    /// calling `start` again with everything in place is a no-op.
    pub async fn start(&mut self) -> Result<()> {
        if self.connection.is_none() {
            let connection = self
                .factory
                .create_connection(self.config.credentials.as_ref())
                .await?;
            self.session = Some(connection.create_session().await?);
            self.connection = Some(connection);
        }

        if self.consumer.is_none() {
            let Some(session) = self.session.as_ref() else {
                return Err(TransportError::Closed("listener is stopped".to_string()));
            };
            let topic = session.create_topic(&self.topic).await?;
            self.consumer = Some(
                session
                    .create_consumer(&topic, Some(TagSelector::connect_requests()))
                    .await?,
            );
            info!(address = %self.address, topic = %topic, "listening for connect requests");
        }

        Ok(())
    }

    /// Wait, unbounded, for the next connect request and return a channel for
    /// that client: peer set to the request's reply destination, local side
    /// freshly allocated on a session of its own.
    ///
    /// A request without a reply destination fails this accept; the caller
    /// decides whether to keep accepting.
    pub async fn accept(&mut self) -> Result<Channel> {
        let Some(consumer) = self.consumer.as_mut() else {
            return Err(TransportError::Closed(
                "listener is not started".to_string(),
            ));
        };

        let request = consumer.receive().await?;
        let Some(reply_to) = request.reply_to else {
            return Err(TransportError::Broker(BrokerError::Other(
                "connect request without a reply destination".to_string(),
            )));
        };

        // One session per accepted client; the channel owns it outright.
        let Some(connection) = self.connection.as_ref() else {
            return Err(TransportError::Closed("listener is stopped".to_string()));
        };
        let session = connection.create_session().await?;

        let mut channel = Channel::new(session);
        channel.set_receive_timeout(self.config.receive_timeout());
        match channel.open(None, Some(reply_to.clone())).await {
            Ok(()) => {}
            Err(e) => {
                let _ = channel.close().await;
                return Err(e);
            }
        }

        debug!(
            address = %self.address,
            peer = %reply_to,
            channel = %channel.id(),
            "connection accepted"
        );
        Ok(channel)
    }

    /// Close the connect subscription, its session and the broker connection,
    /// best-effort: every step is attempted and the last error is reported.
    pub async fn stop(&mut self) -> Result<()> {
        let mut last_err: Option<TransportError> = None;

        if let Some(mut consumer) = self.consumer.take() {
            if let Err(e) = consumer.close().await {
                warn!(address = %self.address, error = %e, "subscription close failed");
                last_err = Some(e.into());
            }
        }
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!(address = %self.address, error = %e, "session close failed");
                last_err = Some(e.into());
            }
        }
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                warn!(address = %self.address, error = %e, "connection close failed");
                last_err = Some(e.into());
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
