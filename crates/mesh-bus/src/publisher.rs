//! # Publish Worker
//!
//! Every request bound for the broker is queued by any caller and issued by a
//! single task, so callers never wait on network I/O and requests from one
//! client reach the transport in the order they were queued.
//!
//! ```text
//! publish()           ──┐
//! SUBSCRIBE (table)   ──┼──→ [outbound queue] ──→ publish worker ──→ Transport
//! UNSUBSCRIBE (table) ──┘                          (awaits each)
//! ```
//!
//! The worker is the only place that waits on the transport. When the
//! connection is backed up it stops draining the queue; nothing queued is
//! dropped while the client runs.

use crate::client::ClientError;
use crate::queue::Queue;
use crate::transport::{QoS, Transport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Completion of a broker SUBSCRIBE/UNSUBSCRIBE request.
pub(crate) type Ack = oneshot::Sender<Result<(), TransportError>>;

pub(crate) enum OutboundJob {
    Publish { topic: String, payload: String },
    Subscribe { topic: String, ack: Option<Ack> },
    Unsubscribe { topic: String, ack: Option<Ack> },
    Shutdown,
}

/// Non-blocking handle onto a client's publish queue.
///
/// Cheap to clone. Safe to use from subscription callbacks, which run on the
/// modification worker and must not wait.
#[derive(Clone)]
pub struct Publisher {
    queue: Arc<Queue<OutboundJob>>,
    closed: Arc<AtomicBool>,
}

impl Publisher {
    pub(crate) fn new() -> Self {
        Self {
            queue: Arc::new(Queue::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue `message` for publication on `topic` and return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::EmptyTopic`] for an empty topic and
    /// [`ClientError::NotRunning`] once the client has stopped.
    pub fn publish(&self, topic: &str, message: &str) -> Result<(), ClientError> {
        if topic.is_empty() {
            return Err(ClientError::EmptyTopic);
        }
        self.push(OutboundJob::Publish {
            topic: topic.to_string(),
            payload: message.to_string(),
        })
    }

    /// Number of requests waiting to be issued.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn subscribe(&self, topic: String, ack: Option<Ack>) -> Result<(), ClientError> {
        self.push(OutboundJob::Subscribe { topic, ack })
    }

    pub(crate) fn unsubscribe(&self, topic: String, ack: Option<Ack>) -> Result<(), ClientError> {
        self.push(OutboundJob::Unsubscribe { topic, ack })
    }

    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.queue.enqueue(OutboundJob::Shutdown);
        }
    }

    pub(crate) fn spawn(&self, transport: Arc<dyn Transport>, qos: QoS) -> tokio::task::JoinHandle<()> {
        tokio::spawn(run_publish_loop(Arc::clone(&self.queue), transport, qos))
    }

    fn push(&self, job: OutboundJob) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::NotRunning);
        }
        self.queue.enqueue(job);
        Ok(())
    }
}

async fn run_publish_loop(queue: Arc<Queue<OutboundJob>>, transport: Arc<dyn Transport>, qos: QoS) {
    debug!("Publish worker started");
    loop {
        match queue.dequeue().await {
            OutboundJob::Publish { topic, payload } => {
                if let Err(e) = transport.publish(&topic, payload.as_bytes(), qos).await {
                    warn!(topic = %topic, error = %e, "Publish failed");
                }
            }
            OutboundJob::Subscribe { topic, ack } => {
                let result = transport.subscribe(&topic, qos).await;
                settle("subscribe", &topic, result, ack);
            }
            OutboundJob::Unsubscribe { topic, ack } => {
                let result = transport.unsubscribe(&topic).await;
                settle("unsubscribe", &topic, result, ack);
            }
            OutboundJob::Shutdown => break,
        }
    }

    // Discarding a job drops its ack, which releases any waiter.
    let mut dropped = 0;
    while queue.try_dequeue().is_some() {
        dropped += 1;
    }
    info!(dropped, "Publish worker stopped");
}

fn settle(op: &'static str, topic: &str, result: Result<(), TransportError>, ack: Option<Ack>) {
    match &result {
        Ok(()) => debug!(op, topic, "Broker request issued"),
        Err(e) => warn!(op, topic, error = %e, "Broker request failed"),
    }
    if let Some(ack) = ack {
        // The requester may have stopped waiting.
        let _ = ack.send(result);
    }
}
