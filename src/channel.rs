//! Channels
//!
//! A channel is a bidirectional message pipe bound to one local (receive)
//! destination and one peer (send) destination. Both the client connector and
//! the server acceptor hand out channels; after the handshake the two sides
//! are symmetric. A channel exclusively owns its broker session and the
//! consumer/producer created from it, and releases them on close.
//!
//! A side that does not know its peer in advance learns it from the first
//! inbound envelope's reply destination. That binding happens exactly once;
//! later envelopes never rebind it.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker::{BrokerSession, Consumer, Destination, Producer};
use crate::envelope::Envelope;
use crate::error::{Result, TransportError};

/// Steady-state receive ceiling when the caller configures none. One hour.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, no broker resources yet
    Unbound,
    /// Binding local and send-side resources
    Connecting,
    /// Exchanging messages
    Open,
    /// Resources released; terminal
    Closed,
}

/// A bidirectional pipe over the broker.
pub struct Channel {
    /// Diagnostic identifier; carries no protocol meaning to the peer
    id: Uuid,
    session: Box<dyn BrokerSession>,
    local: Option<Destination>,
    consumer: Option<Box<dyn Consumer>>,
    peer: Option<Destination>,
    producer: Option<Box<dyn Producer>>,
    receive_timeout: Duration,
    /// Window applied to exactly one receive, then discarded
    handshake_timeout: Option<Duration>,
    state: ChannelState,
}

impl Channel {
    /// Wrap a broker session into an unbound channel. The channel owns the
    /// session from here on.
    pub fn new(session: Box<dyn BrokerSession>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
            local: None,
            consumer: None,
            peer: None,
            producer: None,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            handshake_timeout: None,
            state: ChannelState::Unbound,
        }
    }

    /// Diagnostic identifier, generated once per channel.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// The address this channel receives on, once open.
    pub fn local_destination(&self) -> Option<&Destination> {
        self.local.as_ref()
    }

    /// The address this channel sends to, once known.
    pub fn peer_destination(&self) -> Option<&Destination> {
        self.peer.as_ref()
    }

    /// Replace the steady-state receive window.
    pub fn set_receive_timeout(&mut self, window: Duration) {
        self.receive_timeout = window;
    }

    /// Arm the short one-shot window the next receive runs under. Used by the
    /// client connector so that only the handshake receive is bounded by the
    /// connect timeout.
    pub(crate) fn set_handshake_timeout(&mut self, window: Duration) {
        self.handshake_timeout = Some(window);
    }

    /// Bind the local receive side and, when `peer` is already known, the
    /// send side. A broker-generated temporary address is allocated unless
    /// `local_hint` names a topic.
    ///
    /// # Panics
    ///
    /// Panics when called on a channel that is already open; re-opening is a
    /// programming error, not a recoverable condition.
    pub async fn open(&mut self, local_hint: Option<&str>, peer: Option<Destination>) -> Result<()> {
        match self.state {
            ChannelState::Unbound => {}
            ChannelState::Closed => {
                return Err(TransportError::Closed("channel is closed".to_string()))
            }
            ChannelState::Connecting | ChannelState::Open => {
                panic!("channel {} opened twice", self.id)
            }
        }

        self.state = ChannelState::Connecting;
        match self.bind(local_hint, peer).await {
            Ok(()) => {
                self.state = ChannelState::Open;
                debug!(
                    channel = %self.id,
                    local = %self.local.as_ref().map(Destination::name).unwrap_or("-"),
                    peer = %self.peer.as_ref().map(Destination::name).unwrap_or("-"),
                    "channel open"
                );
                Ok(())
            }
            Err(e) => {
                // Whatever was created stays in place for close() to release.
                self.state = ChannelState::Closed;
                Err(e)
            }
        }
    }

    async fn bind(&mut self, local_hint: Option<&str>, peer: Option<Destination>) -> Result<()> {
        let local = match local_hint {
            Some(name) => self.session.create_topic(name).await?,
            None => self.session.create_temporary_topic().await?,
        };
        self.consumer = Some(self.session.create_consumer(&local, None).await?);
        self.local = Some(local);

        if let Some(peer) = peer {
            self.producer = Some(self.session.create_producer(&peer).await?);
            self.peer = Some(peer);
        }
        Ok(())
    }

    /// Publish this channel's reply address as a connect request on the named
    /// well-known topic, through a short-lived producer on the channel's own
    /// session. The producer is closed before returning; application traffic
    /// never touches the well-known topic.
    pub(crate) async fn publish_connect_request(&mut self, topic: &str) -> Result<()> {
        let Some(local) = self.local.clone() else {
            return Err(TransportError::Closed("channel is not open".to_string()));
        };
        let destination = self.session.create_topic(topic).await?;
        let mut producer = self.session.create_producer(&destination).await?;
        producer.send(Envelope::connect_request(local)).await?;
        producer.close().await?;
        debug!(channel = %self.id, topic = %destination, "connect request published");
        Ok(())
    }

    /// Send an opaque payload to the peer, best-effort. The envelope always
    /// carries this channel's local destination as its reply address.
    pub async fn send(&mut self, payload: Bytes) -> Result<()> {
        if self.state == ChannelState::Closed {
            return Err(TransportError::Closed("channel is closed".to_string()));
        }
        let Some(producer) = self.producer.as_ref() else {
            return Err(TransportError::Closed(
                "peer destination is not bound".to_string(),
            ));
        };

        let mut envelope = Envelope::new(payload);
        envelope.reply_to = self.local.clone();
        producer.send(envelope).await?;
        Ok(())
    }

    /// Wait for the next payload, bounded by the receive window: the one-shot
    /// handshake window if armed (consumed now, success or not), otherwise
    /// the steady-state timeout.
    ///
    /// If the send side is still unbound and the envelope names a reply
    /// destination, the peer is bound here, once, for the life of the
    /// channel.
    pub async fn receive(&mut self) -> Result<Bytes> {
        if self.state == ChannelState::Closed {
            return Err(TransportError::Closed("channel is closed".to_string()));
        }
        let window = self.handshake_timeout.take().unwrap_or(self.receive_timeout);
        let Some(consumer) = self.consumer.as_mut() else {
            return Err(TransportError::Closed("channel is not open".to_string()));
        };

        let envelope = match timeout(window, consumer.receive()).await {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(TransportError::Timeout),
        };

        if self.peer.is_none() && self.producer.is_none() {
            if let Some(reply_to) = envelope.reply_to.clone() {
                self.producer = Some(self.session.create_producer(&reply_to).await?);
                debug!(channel = %self.id, peer = %reply_to, "peer destination discovered");
                self.peer = Some(reply_to);
            }
        }

        Ok(envelope.payload)
    }

    /// Release consumer, producer and session, in that order. Every release
    /// is attempted regardless of earlier failures; the last error, if any,
    /// is returned. Idempotent; the channel is Closed afterwards either way.
    pub async fn close(&mut self) -> Result<()> {
        let mut last_err: Option<TransportError> = None;

        if let Some(mut consumer) = self.consumer.take() {
            if let Err(e) = consumer.close().await {
                warn!(channel = %self.id, error = %e, "consumer close failed");
                last_err = Some(e.into());
            }
        }
        if let Some(mut producer) = self.producer.take() {
            if let Err(e) = producer.close().await {
                warn!(channel = %self.id, error = %e, "producer close failed");
                last_err = Some(e.into());
            }
        }
        if let Err(e) = self.session.close().await {
            warn!(channel = %self.id, error = %e, "session close failed");
            last_err = Some(e.into());
        }

        self.state = ChannelState::Closed;
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
