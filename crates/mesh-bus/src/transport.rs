//! # Broker Transport
//!
//! The seam between the pub/sub client and an actual broker connection.
//! Implementations deliver inbound traffic by calling a [`TransportHandler`]
//! from their own tasks; the client never assumes which task that is.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// CONNACK return code for an accepted connection.
pub const CONNECT_ACCEPTED: u8 = 0;

/// Delivery guarantee requested from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged delivery; duplicates possible.
    #[default]
    AtLeastOnce,
    /// Four-step handshake.
    ExactlyOnce,
}

impl QoS {
    /// Map a numeric level (0, 1, 2).
    #[must_use]
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }

    /// Numeric level.
    #[must_use]
    pub fn level(&self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

/// Transport errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not reach the broker.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The broker answered CONNECT with a non-zero return code.
    #[error("Connection refused by broker (code {code})")]
    Refused {
        /// CONNACK return code.
        code: u8,
    },

    /// Operation attempted before `connect` or after `disconnect`.
    #[error("Transport is not connected")]
    NotConnected,

    /// The connection is gone and cannot take the request.
    #[error("Request failed: {0}")]
    Request(String),

    /// The broker did not answer in time.
    #[error("Timed out waiting for broker")]
    Timeout,
}

/// Receives inbound traffic from a transport.
///
/// Called from transport-owned tasks. Implementations must return quickly
/// and must not call back into blocking transport operations.
pub trait TransportHandler: Send + Sync {
    /// A message arrived on a subscribed topic.
    fn on_message(&self, topic: &str, payload: &[u8]);

    /// The broker acknowledged a connection, including reconnections.
    fn on_connect(&self, code: u8);
}

/// A broker connection.
///
/// `publish`, `subscribe` and `unsubscribe` wait until the connection has
/// taken the request, which may take as long as the connection is backed up.
/// They do not wait for the broker's acknowledgement. The client only calls
/// them from its publish worker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and start delivering traffic to `handler`.
    async fn connect(&self, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError>;

    /// Publish a payload.
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError>;

    /// Subscribe to a topic.
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    /// Unsubscribe from a topic.
    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Disconnect and stop delivering traffic.
    async fn disconnect(&self) -> Result<(), TransportError>;
}
