//! # Links and Topic Naming
//!
//! A link is a `/`-separated path whose first segment is the endpoint of the
//! node that owns it. Request and response topics are derived from endpoints:
//!
//! ```text
//! <node>/requests            inbound GET/PUT envelopes for <node>
//! <node>/responses/<id>      the response to request <id> served by <node>
//! <node>/node_descriptor     DATA link holding <node>'s own descriptor
//! ```

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of a request correlation id.
pub const MESSAGE_ID_LEN: usize = 64;

/// Suffix of the reserved self-descriptive link.
pub const NODE_DESCRIPTOR: &str = "node_descriptor";

/// How a link carries data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// A single current value, read with GET and set with PUT.
    Data,
    /// A sequence of independent messages, published and subscribed.
    Stream,
}

impl LinkKind {
    /// Wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Stream => "STREAM",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a string that names no link kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLinkKind(pub String);

impl fmt::Display for UnknownLinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown link type {:?}", self.0)
    }
}

impl std::error::Error for UnknownLinkKind {}

impl FromStr for LinkKind {
    type Err = UnknownLinkKind;

    /// Case-insensitive: `data`, `Data` and `DATA` are all accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("DATA") {
            Ok(Self::Data)
        } else if s.eq_ignore_ascii_case("STREAM") {
            Ok(Self::Stream)
        } else {
            Err(UnknownLinkKind(s.to_string()))
        }
    }
}

impl Serialize for LinkKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LinkKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Topic on which `node` receives requests.
#[must_use]
pub fn request_link(node: &str) -> String {
    format!("{node}/requests")
}

/// Topic on which `node` publishes the response to request `message_id`.
#[must_use]
pub fn response_link(node: &str, message_id: &str) -> String {
    format!("{node}/responses/{message_id}")
}

/// The reserved DATA link exposing `endpoint`'s descriptor.
#[must_use]
pub fn descriptor_link(endpoint: &str) -> String {
    format!("{endpoint}/{NODE_DESCRIPTOR}")
}

/// The endpoint owning `link`: everything before the first `/`.
///
/// A link without a `/` is its own endpoint.
#[must_use]
pub fn endpoint_of(link: &str) -> &str {
    link.split_once('/').map_or(link, |(endpoint, _)| endpoint)
}

/// Creates a fresh random correlation id of [`MESSAGE_ID_LEN`] alphanumeric
/// characters.
#[must_use]
pub fn create_message_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(MESSAGE_ID_LEN)
        .map(char::from)
        .collect()
}
