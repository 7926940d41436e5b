//! Envelopes
//!
//! The unit actually placed on the broker: an opaque payload, an optional
//! reply destination, and string tags used for broker-side filtering. The
//! protocol defines exactly one tag, a request-type marker whose only value
//! designates a connect request; the listener's subscription filters on it.

use std::collections::HashMap;

use bytes::Bytes;

use crate::broker::Destination;

/// Tag key carrying the request type of a protocol message.
pub const REQUEST_TYPE_TAG: &str = "tunnelmq_request_type";

/// Request-type value announcing a new client connection.
pub const REQUEST_TYPE_CONNECT: &str = "CONNECT";

/// A message as carried by the broker.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Destination the receiver should answer on
    pub reply_to: Option<Destination>,
    /// Opaque application payload
    pub payload: Bytes,
    /// Broker-filterable string tags
    pub tags: HashMap<String, String>,
}

impl Envelope {
    /// An untagged envelope carrying an application payload.
    pub fn new(payload: Bytes) -> Self {
        Self {
            reply_to: None,
            payload,
            tags: HashMap::new(),
        }
    }

    /// The connect request a client publishes on the well-known topic:
    /// empty payload, request-type tag, and the client's private reply
    /// destination.
    pub fn connect_request(reply_to: Destination) -> Self {
        let mut tags = HashMap::new();
        tags.insert(
            REQUEST_TYPE_TAG.to_string(),
            REQUEST_TYPE_CONNECT.to_string(),
        );
        Self {
            reply_to: Some(reply_to),
            payload: Bytes::new(),
            tags,
        }
    }

    /// Whether this envelope is a connect request.
    pub fn is_connect_request(&self) -> bool {
        self.tags
            .get(REQUEST_TYPE_TAG)
            .is_some_and(|v| v.as_str() == REQUEST_TYPE_CONNECT)
    }
}

/// Broker-side subscription filter: equality on a single tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSelector {
    key: String,
    value: String,
}

impl TagSelector {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The selector matching connect requests.
    pub fn connect_requests() -> Self {
        Self::new(REQUEST_TYPE_TAG, REQUEST_TYPE_CONNECT)
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        envelope.tags.get(&self.key).is_some_and(|v| *v == self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_shape() {
        let dest = Destination::from("$tmp/abc");
        let env = Envelope::connect_request(dest.clone());
        assert!(env.is_connect_request());
        assert!(env.payload.is_empty());
        assert_eq!(env.reply_to, Some(dest));
    }

    #[test]
    fn test_selector_matches_only_tagged_envelopes() {
        let selector = TagSelector::connect_requests();

        let connect = Envelope::connect_request(Destination::from("$tmp/abc"));
        assert!(selector.matches(&connect));

        let plain = Envelope::new(Bytes::from_static(b"payload"));
        assert!(!selector.matches(&plain));

        let mut wrong_value = Envelope::new(Bytes::new());
        wrong_value
            .tags
            .insert(REQUEST_TYPE_TAG.to_string(), "DISCONNECT".to_string());
        assert!(!selector.matches(&wrong_value));
    }
}
