//! # Request/Response Envelopes
//!
//! The JSON bodies exchanged on `<node>/requests` and
//! `<node>/responses/<id>`.
//!
//! ```text
//! Request:  {"id": <64 chars>, "method": "GET"|"PUT", "link": <link>, "body": <any>}
//! Response: {"status": <string>, "body": <any>, "type": "DATA"|"STREAM"}
//! ```
//!
//! A response's `type` is informational; one without it is still accepted.
//!
//! Decoding is field-by-field so that a malformed inbound message reports
//! exactly which part was wrong; the caller logs it and drops the message.

use crate::errors::EnvelopeError;
use crate::link::{create_message_id, LinkKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Status of a successful exchange.
pub const STATUS_OK: &str = "200";

/// Status sent when a known link holds no value yet.
pub const STATUS_NOT_FOUND: &str = "404";

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Read the current value of a DATA link.
    #[serde(rename = "GET")]
    Get,
    /// Replace the current value of a DATA link.
    #[serde(rename = "PUT")]
    Put,
}

impl Method {
    /// Wire name of this method.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request sent to another node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, echoed in the response topic.
    pub id: String,
    /// What to do with the link.
    pub method: Method,
    /// Fully-qualified target link.
    pub link: String,
    /// Method-specific payload (`{}` for GET).
    pub body: Value,
}

impl Request {
    /// Creates a GET request for `link` with a fresh correlation id.
    #[must_use]
    pub fn get(link: impl Into<String>) -> Self {
        Self {
            id: create_message_id(),
            method: Method::Get,
            link: link.into(),
            body: json!({}),
        }
    }

    /// Creates a PUT request setting `link` to `data`.
    #[must_use]
    pub fn put(link: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: create_message_id(),
            method: Method::Put,
            link: link.into(),
            body: Value::String(data.into()),
        }
    }

    /// Decodes and validates an inbound request.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not JSON, `id`/`method`/`link` are
    /// missing or not strings, or the method is not GET/PUT.
    pub fn parse(payload: &str) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_str(payload).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;

        let id = string_field(&value, "id")?;
        let method = match string_field(&value, "method")?.as_str() {
            "GET" => Method::Get,
            "PUT" => Method::Put,
            other => return Err(EnvelopeError::UnknownMethod(other.to_string())),
        };
        let link = string_field(&value, "link")?;
        let body = value.get("body").cloned().unwrap_or(Value::Null);

        Ok(Self {
            id,
            method,
            link,
            body,
        })
    }

    /// Encodes this request as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A response to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// HTTP-like status code, as a string.
    pub status: String,
    /// The value read (GET) or `null` (PUT / not found).
    pub body: Value,
    /// Kind of the link the request targeted, if the sender said.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<LinkKind>,
}

impl Response {
    /// Builds a response with an arbitrary status.
    #[must_use]
    pub fn new(status: impl Into<String>, body: Value, kind: LinkKind) -> Self {
        Self {
            status: status.into(),
            body,
            kind: Some(kind),
        }
    }

    /// A successful response carrying `body`.
    #[must_use]
    pub fn ok(body: Value, kind: LinkKind) -> Self {
        Self::new(STATUS_OK, body, kind)
    }

    /// A response for a known link with no stored value.
    #[must_use]
    pub fn not_found(kind: LinkKind) -> Self {
        Self::new(STATUS_NOT_FOUND, Value::Null, kind)
    }

    /// Returns true if the status is [`STATUS_OK`].
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    /// Decodes a response received on a response topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not JSON, lacks `status` or `body`,
    /// or carries a `type` other than DATA/STREAM.
    pub fn parse(payload: &str) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_str(payload).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;

        let status = string_field(&value, "status")?;
        let body = value
            .get("body")
            .cloned()
            .ok_or(EnvelopeError::MissingField("body"))?;
        let kind = match value.get("type") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(
                text.parse::<LinkKind>()
                    .map_err(|_| EnvelopeError::UnknownType(text.clone()))?,
            ),
            Some(_) => return Err(EnvelopeError::MissingField("type")),
        };

        Ok(Self { status, body, kind })
    }

    /// Encodes this response as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Renders the body as the string a caller of GET receives.
    ///
    /// A JSON string is returned as its contents; anything else is returned
    /// in its JSON encoding.
    #[must_use]
    pub fn body_text(&self) -> String {
        match &self.body {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

fn string_field(value: &Value, field: &'static str) -> Result<String, EnvelopeError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(EnvelopeError::MissingField(field))
}
