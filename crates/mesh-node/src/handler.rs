//! # Inbound Request Handling
//!
//! Serves GET and PUT requests that arrive on `<endpoint>/requests`.
//!
//! ```text
//! transport ─→ modification worker ─→ RequestHandler::handle
//!                                          │ parse + validate
//!                                          ▼
//!                                   local-data worker
//!                                          │ read/write value
//!                                          ▼
//!                                   publish queue ─→ <endpoint>/responses/<id>
//! ```
//!
//! `handle` runs on the pub/sub client's modification worker, so it never
//! waits: the data access is submitted to the local-data worker and the
//! response goes out through the non-blocking publish queue.
//!
//! Requests that fail validation are logged and dropped without a response;
//! the requester's retry loop treats that like message loss.

use crate::capabilities::LinkCapabilities;
use mesh_bus::{Publisher, WorkerHandle};
use mesh_telemetry::{MESSAGES_PUBLISHED, MESSAGES_RECEIVED, REQUESTS_DROPPED, REQUESTS_SERVED};
use mesh_types::{response_link, LinkKind, Method, Request, Response};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Current values of the node's DATA links. Owned by the local-data worker.
#[derive(Debug, Default)]
pub struct LocalData {
    values: HashMap<String, String>,
}

impl LocalData {
    /// Store `value` under `link`, replacing any previous value.
    pub fn insert(&mut self, link: impl Into<String>, value: impl Into<String>) {
        self.values.insert(link.into(), value.into());
    }

    /// Current value of `link`.
    #[must_use]
    pub fn get(&self, link: &str) -> Option<&str> {
        self.values.get(link).map(String::as_str)
    }

    /// Number of links holding a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Services requests addressed to one node.
pub(crate) struct RequestHandler {
    capabilities: Arc<LinkCapabilities>,
    data: WorkerHandle<LocalData>,
    publisher: Publisher,
}

impl RequestHandler {
    pub(crate) fn new(
        capabilities: Arc<LinkCapabilities>,
        data: WorkerHandle<LocalData>,
        publisher: Publisher,
    ) -> Self {
        Self {
            capabilities,
            data,
            publisher,
        }
    }

    /// Handle one raw request payload.
    pub(crate) fn handle(&self, payload: &str) {
        MESSAGES_RECEIVED.inc();

        let request = match Request::parse(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Dropping malformed request");
                REQUESTS_DROPPED.with_label_values(&["malformed"]).inc();
                return;
            }
        };

        let Some(kind) = self.capabilities.kind_of(&request.link) else {
            warn!(link = %request.link, id = %request.id, "Request for unknown link");
            REQUESTS_DROPPED.with_label_values(&["unknown_link"]).inc();
            return;
        };

        debug!(
            method = %request.method,
            link = %request.link,
            id = %request.id,
            "Serving request"
        );

        match request.method {
            Method::Get => self.serve_get(request, kind),
            Method::Put => self.serve_put(request),
        }
    }

    /// Answers 404 with a null body while the link has no value, so a
    /// requester can tell "unset" from an empty string.
    fn serve_get(&self, request: Request, kind: LinkKind) {
        let reply = self.reply_sink(request.id);
        let link = request.link;

        let submitted = self.data.submit(move |data| {
            let response = match data.get(&link) {
                Some(value) => Response::ok(Value::String(value.to_string()), kind),
                None => {
                    debug!(link = %link, "No value stored");
                    Response::not_found(kind)
                }
            };
            reply.send(&response, Method::Get);
        });
        if submitted.is_err() {
            debug!("Local data is shut down; dropping GET");
        }
    }

    fn serve_put(&self, request: Request) {
        if !self.capabilities.is_puttable(&request.link) {
            warn!(link = %request.link, id = %request.id, "PUT to link that is not puttable");
            REQUESTS_DROPPED.with_label_values(&["not_puttable"]).inc();
            return;
        }

        let value = match request.body {
            Value::String(text) => text,
            other => other.to_string(),
        };
        let reply = self.reply_sink(request.id);
        let link = request.link;

        let submitted = self.data.submit(move |data| {
            data.insert(link, value);
            reply.send(&Response::ok(Value::Null, LinkKind::Data), Method::Put);
        });
        if submitted.is_err() {
            debug!("Local data is shut down; dropping PUT");
        }
    }

    fn reply_sink(&self, id: String) -> ReplySink {
        ReplySink {
            topic: response_link(self.capabilities.endpoint(), &id),
            publisher: self.publisher.clone(),
        }
    }
}

/// Where the response to one request goes.
struct ReplySink {
    topic: String,
    publisher: Publisher,
}

impl ReplySink {
    fn send(&self, response: &Response, method: Method) {
        let payload = match response.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!(topic = %self.topic, error = %e, "Failed to encode response");
                REQUESTS_DROPPED.with_label_values(&["encode"]).inc();
                return;
            }
        };

        match self.publisher.publish(&self.topic, &payload) {
            Ok(()) => {
                MESSAGES_PUBLISHED.inc();
                REQUESTS_SERVED.with_label_values(&[method.as_str()]).inc();
            }
            Err(e) => warn!(topic = %self.topic, error = %e, "Failed to publish response"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_data_last_write_wins() {
        let mut data = LocalData::default();
        assert!(data.is_empty());

        data.insert("n/1", "a");
        data.insert("n/1", "a");
        assert_eq!(data.get("n/1"), Some("a"));
        assert_eq!(data.len(), 1);

        data.insert("n/1", "b");
        assert_eq!(data.get("n/1"), Some("b"));
        assert_eq!(data.get("n/2"), None);
    }
}
