//! # Mesh Node
//!
//! A node owns a set of links declared by its descriptor and talks to other
//! nodes through a shared pub/sub client.
//!
//! ## Operations
//!
//! | Operation   | Allowed on       | Network                                  |
//! |-------------|------------------|------------------------------------------|
//! | `publish`   | own STREAM links | publish on the link                      |
//! | `put`       | own DATA links   | none; stored locally                     |
//! | `get`       | requested DATA   | request/response with retries            |
//! | `subscribe` | requested STREAM | subscribe on the link                    |
//!
//! Every operation checks the capability first. A rejected call is logged
//! and returns an error without touching the network.
//!
//! ## GET exchange
//!
//! ```text
//! requester                                  owner (endpoint R)
//!   subscribe R/responses/<id>
//!   ┌─ attempt 1..=retries ─────────────┐
//!   │ publish R/requests {id,GET,link}  │ ──→  look up link
//!   │ wait `timeout` on response queue  │ ←──  publish R/responses/<id>
//!   └───────────────────────────────────┘
//!   unsubscribe R/responses/<id>
//! ```
//!
//! The response queue lives for the whole call, so a reply to an earlier
//! attempt that arrives late still completes it.

use crate::capabilities::LinkCapabilities;
use crate::config::RpcConfig;
use crate::handler::{LocalData, RequestHandler};
use mesh_bus::{ClientError, PubSubClient, Publisher, Queue, Transport, Worker, WorkerError};
use mesh_telemetry::{GET_RETRIES, GET_TIMEOUTS, MESSAGES_PUBLISHED};
use mesh_types::{
    descriptor_link, endpoint_of, request_link, response_link, DescriptorError, EnvelopeError,
    Request, Response,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from node construction and operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The descriptor could not be resolved.
    #[error("Invalid descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    /// A message could not be serialized.
    #[error("Failed to encode {what}: {reason}")]
    Encode { what: &'static str, reason: String },

    #[error("Link {0} is not publishable by this node")]
    NotPublishable(String),

    #[error("Link {0} is not puttable by this node")]
    NotPuttable(String),

    #[error("Link {0} is not gettable by this node")]
    NotGettable(String),

    #[error("Link {0} is not subscribable by this node")]
    NotSubscribable(String),

    /// No response arrived within the retry budget.
    #[error("No response for {link} after {attempts} attempt(s)")]
    Timeout { link: String, attempts: u32 },

    /// A response arrived but could not be decoded.
    #[error("Malformed response for {link}: {source}")]
    BadResponse {
        link: String,
        #[source]
        source: EnvelopeError,
    },

    /// The remote node answered with a non-success status.
    #[error("Request for {link} failed with status {status}")]
    Status { link: String, status: String },

    #[error("Pub/sub client error: {0}")]
    Client(#[from] ClientError),

    #[error("Local data worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// A node on the mesh.
pub struct MeshNode {
    capabilities: Arc<LinkCapabilities>,
    client: Arc<PubSubClient>,
    publisher: Publisher,
    data: Worker<LocalData>,
    rpc: RpcConfig,
}

impl MeshNode {
    /// Create a client over `transport`, start it, and build a node on it.
    ///
    /// # Errors
    ///
    /// Fails if the transport cannot connect or the descriptor is invalid.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        descriptor: Value,
        rpc: RpcConfig,
    ) -> Result<Self, NodeError> {
        let client = Arc::new(PubSubClient::new(transport, rpc.qos));
        client.start().await?;

        match Self::new(Arc::clone(&client), descriptor, rpc).await {
            Ok(node) => Ok(node),
            Err(e) => {
                client.stop().await;
                Err(e)
            }
        }
    }

    /// Build a node on a started client.
    ///
    /// Resolves the descriptor, seeds `<endpoint>/node_descriptor`, starts
    /// the local-data worker and subscribes to `<endpoint>/requests`.
    ///
    /// # Errors
    ///
    /// Any failure aborts construction; nothing is left subscribed.
    pub async fn new(
        client: Arc<PubSubClient>,
        descriptor: Value,
        rpc: RpcConfig,
    ) -> Result<Self, NodeError> {
        let capabilities = Arc::new(LinkCapabilities::from_descriptor(&descriptor)?);
        let endpoint = capabilities.endpoint().to_string();

        let serialized = serde_json::to_string(&descriptor).map_err(|e| NodeError::Encode {
            what: "descriptor",
            reason: e.to_string(),
        })?;
        let publisher = client.publisher()?;

        let mut local = LocalData::default();
        local.insert(descriptor_link(&endpoint), serialized);
        let data = Worker::spawn("local-data", local);

        let handler = RequestHandler::new(
            Arc::clone(&capabilities),
            data.handle(),
            publisher.clone(),
        );
        let subscribed = client
            .subscribe_with_callback(
                &request_link(&endpoint),
                Arc::new(move |_topic: &str, payload: &str| handler.handle(payload)),
            )
            .await;
        if let Err(e) = subscribed {
            data.shutdown().await;
            return Err(e.into());
        }

        info!(
            endpoint = %endpoint,
            links = capabilities.links().len(),
            "Node started"
        );

        Ok(Self {
            capabilities,
            client,
            publisher,
            data,
            rpc,
        })
    }

    /// The node's endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.capabilities.endpoint()
    }

    /// The node's resolved capabilities.
    #[must_use]
    pub fn capabilities(&self) -> &LinkCapabilities {
        &self.capabilities
    }

    /// The underlying pub/sub client.
    #[must_use]
    pub fn client(&self) -> &Arc<PubSubClient> {
        &self.client
    }

    /// Publish `message` on one of this node's STREAM links.
    pub fn publish(&self, link: &str, message: &str) -> Result<(), NodeError> {
        if !self.capabilities.is_publishable(link) {
            warn!(link, "Publish rejected: link is not publishable");
            return Err(NodeError::NotPublishable(link.to_string()));
        }
        self.publisher.publish(link, message)?;
        MESSAGES_PUBLISHED.inc();
        Ok(())
    }

    /// Set the value of one of this node's DATA links.
    ///
    /// Purely local; other nodes observe it through GET.
    pub fn put(&self, link: &str, data: &str) -> Result<(), NodeError> {
        if !self.capabilities.is_puttable(link) {
            warn!(link, "Put rejected: link is not puttable");
            return Err(NodeError::NotPuttable(link.to_string()));
        }
        let link = link.to_string();
        let data = data.to_string();
        self.data.handle().submit(move |local| local.insert(link, data))?;
        Ok(())
    }

    /// Current local value of one of this node's DATA links.
    pub async fn value(&self, link: &str) -> Result<Option<String>, NodeError> {
        let link = link.to_string();
        Ok(self
            .data
            .handle()
            .call(move |local| local.get(&link).map(str::to_string))
            .await?)
    }

    /// Read a DATA link on another node.
    ///
    /// Makes up to `retries` attempts, waiting `timeout` for a response after
    /// each. A JSON string body is returned as its contents, any other body
    /// in its JSON encoding.
    ///
    /// # Errors
    ///
    /// - [`NodeError::NotGettable`] if the link was not requested as DATA.
    /// - [`NodeError::Timeout`] if no attempt was answered.
    /// - [`NodeError::Status`] with status `"404"` if the owner has never
    ///   stored a value for the link. An unset value is an error, not `""`.
    /// - [`NodeError::BadResponse`] if the reply could not be decoded.
    pub async fn get(
        &self,
        link: &str,
        retries: u32,
        timeout: Duration,
    ) -> Result<String, NodeError> {
        if !self.capabilities.is_gettable(link) {
            warn!(link, "Get rejected: link is not gettable");
            return Err(NodeError::NotGettable(link.to_string()));
        }

        let response = self.exchange(Request::get(link), retries, timeout).await?;
        Ok(response.body_text())
    }

    /// [`MeshNode::get`] with the configured retries and timeout.
    pub async fn get_with_defaults(&self, link: &str) -> Result<String, NodeError> {
        self.get(link, self.rpc.get_retries, self.rpc.get_timeout)
            .await
    }

    /// Set a DATA link on another node.
    pub async fn put_remote(
        &self,
        link: &str,
        data: &str,
        retries: u32,
        timeout: Duration,
    ) -> Result<(), NodeError> {
        if !self.capabilities.is_gettable(link) {
            warn!(link, "Remote put rejected: link is not a requested DATA link");
            return Err(NodeError::NotGettable(link.to_string()));
        }

        self.exchange(Request::put(link, data), retries, timeout)
            .await?;
        Ok(())
    }

    /// Subscribe to a STREAM link on another node.
    pub async fn subscribe(&self, link: &str) -> Result<Arc<Queue<String>>, NodeError> {
        if !self.capabilities.is_subscribable(link) {
            warn!(link, "Subscribe rejected: link is not subscribable");
            return Err(NodeError::NotSubscribable(link.to_string()));
        }
        Ok(self.client.subscribe(link).await?)
    }

    /// Stop serving requests and shut down the client.
    pub async fn stop(&self) {
        if let Err(e) = self.client.unsubscribe(&request_link(self.endpoint())).await {
            debug!(error = %e, "Request topic already gone");
        }
        self.data.shutdown().await;
        self.client.stop().await;
        info!(endpoint = %self.endpoint(), "Node stopped");
    }

    async fn exchange(
        &self,
        request: Request,
        retries: u32,
        timeout: Duration,
    ) -> Result<Response, NodeError> {
        let remote = endpoint_of(&request.link);
        let request_topic = request_link(remote);
        let response_topic = response_link(remote, &request.id);

        let payload = request.to_json().map_err(|e| NodeError::Encode {
            what: "request",
            reason: e.to_string(),
        })?;

        // Armed before subscribing so a cancelled call cannot leave it behind.
        let subscription = ResponseSubscription {
            client: &self.client,
            topic: response_topic,
            armed: true,
        };
        let responses = self.client.subscribe(&subscription.topic).await?;
        let outcome = self
            .attempt(&request_topic, &payload, &responses, retries, timeout)
            .await;
        subscription.close().await;

        let Some(raw) = outcome? else {
            GET_TIMEOUTS.inc();
            warn!(link = %request.link, attempts = retries, "Request timed out");
            return Err(NodeError::Timeout {
                link: request.link,
                attempts: retries,
            });
        };

        let response = Response::parse(&raw).map_err(|source| NodeError::BadResponse {
            link: request.link.clone(),
            source,
        })?;
        if !response.is_ok() {
            return Err(NodeError::Status {
                link: request.link,
                status: response.status,
            });
        }
        Ok(response)
    }

    async fn attempt(
        &self,
        request_topic: &str,
        payload: &str,
        responses: &Queue<String>,
        retries: u32,
        timeout: Duration,
    ) -> Result<Option<String>, NodeError> {
        for attempt in 1..=retries {
            if attempt > 1 {
                GET_RETRIES.inc();
            }
            self.publisher.publish(request_topic, payload)?;
            MESSAGES_PUBLISHED.inc();

            if let Some(raw) = responses.dequeue_timeout(timeout).await {
                debug!(topic = request_topic, attempt, "Response received");
                return Ok(Some(raw));
            }
            debug!(topic = request_topic, attempt, "No response yet");
        }
        Ok(None)
    }
}

/// The response topic of one exchange.
///
/// Unsubscribed by [`ResponseSubscription::close`], or from `Drop` when the
/// exchange is abandoned mid-flight.
struct ResponseSubscription<'a> {
    client: &'a PubSubClient,
    topic: String,
    armed: bool,
}

impl ResponseSubscription<'_> {
    async fn close(mut self) {
        self.armed = false;
        if let Err(e) = self.client.unsubscribe(&self.topic).await {
            warn!(topic = %self.topic, error = %e, "Failed to unsubscribe response topic");
        }
    }
}

impl Drop for ResponseSubscription<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!(topic = %self.topic, "Exchange abandoned; releasing response topic");
        if let Err(e) = self.client.unsubscribe_nowait(&self.topic) {
            debug!(topic = %self.topic, error = %e, "Response topic not released");
        }
    }
}
