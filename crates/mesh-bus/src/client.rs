//! # Pub/Sub Client
//!
//! Lifecycle: `Created → Started → Stopped`.
//!
//! ```text
//! start():  spawn modification worker → transport.connect(handler)
//!           → spawn publish worker
//! stop():   modification sentinel → publish sentinel → await both
//!           → transport.disconnect()
//! ```
//!
//! Subscribe and unsubscribe are closures run on the modification worker.
//! The closure updates the table and queues the broker request on the
//! publish worker; the caller waits on a one-shot rendezvous until the
//! transport has taken it. Inbound messages and reconnects are submitted to
//! the modification worker without waiting, from whatever task the transport
//! calls us on.

use crate::publisher::Publisher;
use crate::queue::Queue;
use crate::subscriber::{queue_callback, Callback, SubscriptionTable};
use crate::transport::{QoS, Transport, TransportError, TransportHandler, CONNECT_ACCEPTED};
use crate::worker::{Worker, WorkerError, WorkerHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long `stop` waits for queued broker requests to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client is not started, or has been stopped.
    #[error("Client is not running")]
    NotRunning,

    /// `start` was called on a client that already started.
    #[error("Client already started")]
    AlreadyStarted,

    /// Topics must be non-empty.
    #[error("Topic must not be empty")]
    EmptyTopic,

    /// The transport rejected the request.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The modification worker did not run the request.
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

struct Running {
    modifications: Worker<SubscriptionTable>,
    publisher: Publisher,
    publish_task: JoinHandle<()>,
}

enum ClientState {
    Created,
    Starting,
    Started(Running),
    Stopped,
}

/// Asynchronous pub/sub client over a [`Transport`].
pub struct PubSubClient {
    transport: Arc<dyn Transport>,
    qos: QoS,
    state: Mutex<ClientState>,
}

impl PubSubClient {
    /// Create a client. Nothing runs until [`PubSubClient::start`].
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, qos: QoS) -> Self {
        Self {
            transport,
            qos,
            state: Mutex::new(ClientState::Created),
        }
    }

    /// QoS used for subscriptions and publishes.
    #[must_use]
    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Connect the transport and launch both workers.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AlreadyStarted`] unless the client is fresh,
    /// or the transport's connection error. On failure nothing is left
    /// running and `start` may be retried.
    pub async fn start(&self) -> Result<(), ClientError> {
        {
            let mut state = self.state.lock();
            match *state {
                ClientState::Created => *state = ClientState::Starting,
                ClientState::Stopped => return Err(ClientError::NotRunning),
                _ => return Err(ClientError::AlreadyStarted),
            }
        }

        let publisher = Publisher::new();
        let modifications = Worker::spawn("modifications", SubscriptionTable::new(publisher.clone()));
        let handler = Arc::new(ClientHandler {
            modifications: modifications.handle(),
        });

        if let Err(e) = self.transport.connect(handler).await {
            error!(error = %e, "Failed to connect transport");
            modifications.shutdown().await;
            *self.state.lock() = ClientState::Created;
            return Err(e.into());
        }

        let publish_task = publisher.spawn(Arc::clone(&self.transport), self.qos);

        *self.state.lock() = ClientState::Started(Running {
            modifications,
            publisher,
            publish_task,
        });
        info!("Pub/sub client started");
        Ok(())
    }

    /// Drain and stop both workers, then disconnect the transport.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), ClientState::Stopped);
        let ClientState::Started(mut running) = previous else {
            return;
        };

        running.modifications.shutdown().await;
        running.publisher.close();
        match tokio::time::timeout(DRAIN_TIMEOUT, &mut running.publish_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Publish worker failed"),
            Err(_) => {
                warn!(
                    pending = running.publisher.pending(),
                    "Publish worker did not drain; aborting"
                );
                running.publish_task.abort();
            }
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Transport disconnect failed");
        }
        info!("Pub/sub client stopped");
    }

    /// Check whether the client is started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), ClientState::Started(_))
    }

    /// Subscribe `callback` to `topic`, waiting until the subscription is in
    /// the table and SUBSCRIBE has been issued.
    ///
    /// The callback runs on the modification worker. It must not wait on
    /// this client; use a [`Publisher`] to send from it.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is empty, the client is not running, or
    /// the transport rejects the subscription.
    pub async fn subscribe_with_callback(
        &self,
        topic: &str,
        callback: Callback,
    ) -> Result<(), ClientError> {
        if topic.is_empty() {
            return Err(ClientError::EmptyTopic);
        }
        let modifications = self.modifications()?;
        let (ack, issued) = oneshot::channel();
        let entry = topic.to_string();
        modifications
            .call(move |table| table.insert(entry, callback, Some(ack)))
            .await??;

        if let Err(e) = settled(issued).await {
            let entry = topic.to_string();
            if let Err(worker) = modifications.call(move |table| table.discard(&entry)).await {
                debug!(topic, error = %worker, "Could not discard failed subscription");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Subscribe to `topic`, delivering payloads onto a fresh queue.
    ///
    /// # Errors
    ///
    /// Same as [`PubSubClient::subscribe_with_callback`].
    pub async fn subscribe(&self, topic: &str) -> Result<Arc<Queue<String>>, ClientError> {
        let queue = Arc::new(Queue::new());
        self.subscribe_with_callback(topic, queue_callback(Arc::clone(&queue)))
            .await?;
        Ok(queue)
    }

    /// Remove the subscription for `topic`, waiting until it is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is not running or the transport
    /// rejects the request.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        let (ack, issued) = oneshot::channel();
        let topic = topic.to_string();
        self.modifications()?
            .call(move |table| table.remove(&topic, Some(ack)))
            .await??;
        settled(issued).await
    }

    /// Remove the subscription for `topic` without waiting.
    ///
    /// Safe to call from `Drop` and from subscription callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotRunning`] unless the client is started.
    pub fn unsubscribe_nowait(&self, topic: &str) -> Result<(), ClientError> {
        let topic = topic.to_string();
        self.modifications()?.submit(move |table| {
            if let Err(e) = table.remove(&topic, None) {
                debug!(topic = %topic, error = %e, "Unsubscribe not queued");
            }
        })?;
        Ok(())
    }

    /// Queue `message` for publication on `topic`. Never waits.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty topic or a client that is not running.
    pub fn publish(&self, topic: &str, message: &str) -> Result<(), ClientError> {
        self.publisher()?.publish(topic, message)
    }

    /// Handle onto the publish queue.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotRunning`] unless the client is started.
    pub fn publisher(&self) -> Result<Publisher, ClientError> {
        match &*self.state.lock() {
            ClientState::Started(running) => Ok(running.publisher.clone()),
            _ => Err(ClientError::NotRunning),
        }
    }

    /// Topics currently in the subscription table.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is not running.
    pub async fn subscribed_topics(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.modifications()?.call(|table| table.topics()).await?)
    }

    fn modifications(&self) -> Result<WorkerHandle<SubscriptionTable>, ClientError> {
        match &*self.state.lock() {
            ClientState::Started(running) => Ok(running.modifications.handle()),
            _ => Err(ClientError::NotRunning),
        }
    }
}

/// Wait for the transport to take a queued SUBSCRIBE/UNSUBSCRIBE.
async fn settled(issued: oneshot::Receiver<Result<(), TransportError>>) -> Result<(), ClientError> {
    match issued.await {
        Ok(result) => Ok(result?),
        // Discarded by a stopping publish worker.
        Err(_) => Err(ClientError::NotRunning),
    }
}

impl Drop for PubSubClient {
    fn drop(&mut self) {
        // The modification worker stops itself when dropped.
        if let ClientState::Started(running) = &*self.state.lock() {
            running.publisher.close();
        }
    }
}

/// Transport-facing side of the client. Only ever submits work.
struct ClientHandler {
    modifications: WorkerHandle<SubscriptionTable>,
}

impl TransportHandler for ClientHandler {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        let payload = match std::str::from_utf8(payload) {
            Ok(text) => text.to_string(),
            Err(e) => {
                warn!(topic, error = %e, "Dropping non-UTF-8 payload");
                return;
            }
        };
        let topic = topic.to_string();

        let submitted = self.modifications.submit(move |table| {
            table.dispatch(&topic, &payload);
        });
        if submitted.is_err() {
            debug!("Message arrived after shutdown; dropped");
        }
    }

    fn on_connect(&self, code: u8) {
        if code != CONNECT_ACCEPTED {
            warn!(code, "Broker refused connection");
            return;
        }
        let submitted = self.modifications.submit(|table| {
            table.resubscribe_all();
        });
        if submitted.is_err() {
            debug!("Connect arrived after shutdown; ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use std::collections::HashSet;
    use std::time::Duration;

    struct Silent;

    impl TransportHandler for Silent {
        fn on_message(&self, _topic: &str, _payload: &[u8]) {}
        fn on_connect(&self, _code: u8) {}
    }

    async fn started(broker: &Arc<MemoryBroker>) -> PubSubClient {
        let client = PubSubClient::new(Arc::new(broker.transport()), QoS::default());
        client.start().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_callback_delivery() {
        let broker = MemoryBroker::new();
        let client = started(&broker).await;
        let received = Arc::new(Queue::new());

        let sink = Arc::clone(&received);
        client
            .subscribe_with_callback(
                "node/0",
                Arc::new(move |topic: &str, payload: &str| {
                    sink.enqueue(format!("{topic}={payload}"));
                }),
            )
            .await
            .unwrap();
        client.publish("node/0", "hi").unwrap();

        let message = received
            .dequeue_timeout(Duration::from_secs(1))
            .await
            .expect("timeout");
        assert_eq!(message, "node/0=hi");
        client.stop().await;
    }

    #[tokio::test]
    async fn test_queue_subscription_and_unsubscribe() {
        let broker = MemoryBroker::new();
        let client = started(&broker).await;

        let queue = client.subscribe("t").await.unwrap();
        client.publish("t", "one").unwrap();
        assert_eq!(
            queue.dequeue_timeout(Duration::from_secs(1)).await,
            Some("one".to_string())
        );

        client.unsubscribe("t").await.unwrap();
        assert!(client.subscribed_topics().await.unwrap().is_empty());
        assert_eq!(broker.subscriber_count("t"), 0);

        client.publish("t", "two").unwrap();
        assert!(queue.dequeue_timeout(Duration::from_millis(50)).await.is_none());
        client.stop().await;
    }

    #[tokio::test]
    async fn test_empty_topic_rejected() {
        let broker = MemoryBroker::new();
        let client = started(&broker).await;

        assert!(matches!(
            client.publish("", "x"),
            Err(ClientError::EmptyTopic)
        ));
        assert!(matches!(
            client.subscribe("").await,
            Err(ClientError::EmptyTopic)
        ));
        client.stop().await;
        assert!(broker.publish_log().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishes_delivered_once() {
        let broker = MemoryBroker::new();
        let client = Arc::new(started(&broker).await);
        let tasks = 16;
        let per_task = 50;

        let mut handles = Vec::new();
        for t in 0..tasks {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                for i in 0..per_task {
                    client.publish("load", &format!("{t}-{i}")).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // Stop drains the publish queue before returning.
        client.stop().await;

        let payloads: Vec<String> = broker.published_on("load").iter().map(|m| m.text()).collect();
        let unique: HashSet<&String> = payloads.iter().collect();
        assert_eq!(payloads.len(), tasks * per_task);
        assert_eq!(unique.len(), tasks * per_task);
    }

    #[tokio::test]
    async fn test_reconnect_resubscribes_each_topic_once() {
        let broker = MemoryBroker::new();
        let client = started(&broker).await;
        let a = client.subscribe("a").await.unwrap();
        client.subscribe("b").await.unwrap();

        broker.simulate_reconnect();
        // Queued behind the resubscribe closure.
        let topics = client.subscribed_topics().await.unwrap();
        assert_eq!(topics, vec!["a", "b"]);

        // Issued behind the resubscribe requests.
        client.publish("a", "after").unwrap();
        assert_eq!(
            a.dequeue_timeout(Duration::from_secs(1)).await,
            Some("after".to_string())
        );
        assert_eq!(broker.subscribe_count("a"), 2);
        assert_eq!(broker.subscribe_count("b"), 2);
        assert_eq!(broker.subscriber_count("a"), 1);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_operations_require_running_client() {
        let broker = MemoryBroker::new();
        let client = PubSubClient::new(Arc::new(broker.transport()), QoS::default());
        assert!(matches!(client.publish("t", "x"), Err(ClientError::NotRunning)));

        client.start().await.unwrap();
        assert!(matches!(
            client.start().await,
            Err(ClientError::AlreadyStarted)
        ));

        client.stop().await;
        client.stop().await;
        assert!(!client.is_running());
        assert!(matches!(client.publish("t", "x"), Err(ClientError::NotRunning)));
        assert!(matches!(
            client.subscribe("t").await,
            Err(ClientError::NotRunning)
        ));
        assert!(matches!(
            client.unsubscribe("t").await,
            Err(ClientError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_failed_start_can_retry() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(true);
        let client = PubSubClient::new(Arc::new(broker.transport()), QoS::default());

        assert!(matches!(
            client.start().await,
            Err(ClientError::Transport(TransportError::Refused { .. }))
        ));
        assert!(!client.is_running());

        broker.refuse_connections(false);
        client.start().await.unwrap();
        assert!(client.is_running());
        client.stop().await;
        assert_eq!(broker.session_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_nowait() {
        let broker = MemoryBroker::new();
        let client = started(&broker).await;
        client.subscribe("t").await.unwrap();

        client.unsubscribe_nowait("t").unwrap();
        // Runs after the removal on the modification worker.
        assert!(client.subscribed_topics().await.unwrap().is_empty());

        client.stop().await;
        assert!(matches!(
            client.unsubscribe_nowait("t"),
            Err(ClientError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_non_utf8_payload_dropped() {
        let broker = MemoryBroker::new();
        let client = started(&broker).await;
        let queue = client.subscribe("bin").await.unwrap();

        let raw = broker.transport();
        raw.connect(Arc::new(Silent)).await.unwrap();
        raw.publish("bin", &[0xff, 0xfe], QoS::default()).await.unwrap();
        raw.publish("bin", b"ok", QoS::default()).await.unwrap();

        assert_eq!(
            queue.dequeue_timeout(Duration::from_secs(1)).await,
            Some("ok".to_string())
        );
        assert!(queue.is_empty());
        client.stop().await;
    }
}
