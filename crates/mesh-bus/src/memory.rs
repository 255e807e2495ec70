//! # In-Memory Broker
//!
//! A process-local stand-in for an MQTT broker. Every [`MemoryTransport`]
//! created from one [`MemoryBroker`] shares the same topic space, so several
//! clients (and nodes) can talk to each other inside a single test.
//!
//! ## Fault injection
//!
//! - [`MemoryBroker::drop_next`] silently loses the next `n` publishes.
//! - [`MemoryBroker::simulate_reconnect`] wipes every session's
//!   subscriptions and re-sends CONNACK, like a broker restart with a clean
//!   session.
//! - [`MemoryBroker::refuse_connections`] answers CONNECT with a refusal.
//!
//! Routing is exact topic match. Handlers are invoked after the broker lock
//! is released, on the task that called `publish`. The broker never applies
//! backpressure, so every operation completes on its first poll.

use crate::transport::{QoS, Transport, TransportError, TransportHandler, CONNECT_ACCEPTED};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// CONNACK code used when connections are refused ("not authorized").
const REFUSED_CODE: u8 = 5;

/// A message as the broker received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Topic it was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// Payload as UTF-8, lossy.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

struct Session {
    handler: Arc<dyn TransportHandler>,
    topics: HashSet<String>,
}

#[derive(Default)]
struct BrokerState {
    next_session: u64,
    sessions: HashMap<u64, Session>,
    drop_budget: usize,
    refuse: bool,
    log: Vec<PublishedMessage>,
    subscribe_counts: HashMap<String, usize>,
}

/// Shared in-memory broker.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
}

impl MemoryBroker {
    /// Create a new broker.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a transport attached to this broker.
    #[must_use]
    pub fn transport(self: &Arc<Self>) -> MemoryTransport {
        MemoryTransport {
            broker: Arc::clone(self),
            session: Mutex::new(None),
        }
    }

    /// Lose the next `count` published messages. They still appear in the
    /// publish log.
    pub fn drop_next(&self, count: usize) {
        self.state.lock().drop_budget += count;
    }

    /// Answer future CONNECTs with a refusal.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// Forget every session's subscriptions and send each a fresh CONNACK.
    pub fn simulate_reconnect(&self) {
        let handlers: Vec<Arc<dyn TransportHandler>> = {
            let mut state = self.state.lock();
            state
                .sessions
                .values_mut()
                .map(|session| {
                    session.topics.clear();
                    Arc::clone(&session.handler)
                })
                .collect()
        };

        debug!(sessions = handlers.len(), "Simulating broker reconnect");
        for handler in handlers {
            handler.on_connect(CONNECT_ACCEPTED);
        }
    }

    /// Every message published so far, in order.
    #[must_use]
    pub fn publish_log(&self) -> Vec<PublishedMessage> {
        self.state.lock().log.clone()
    }

    /// Messages published on `topic`, in order.
    #[must_use]
    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    /// Number of SUBSCRIBE requests received for `topic`.
    #[must_use]
    pub fn subscribe_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .subscribe_counts
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    /// Number of sessions currently subscribed to `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .filter(|session| session.topics.contains(topic))
            .count()
    }

    /// Number of connected sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    fn route(&self, topic: &str, payload: &[u8]) {
        let targets: Vec<Arc<dyn TransportHandler>> = {
            let mut state = self.state.lock();
            state.log.push(PublishedMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            });

            if state.drop_budget > 0 {
                state.drop_budget -= 1;
                debug!(topic, "Dropping message");
                return;
            }

            state
                .sessions
                .values()
                .filter(|session| session.topics.contains(topic))
                .map(|session| Arc::clone(&session.handler))
                .collect()
        };

        trace!(topic, receivers = targets.len(), "Routing message");
        for handler in targets {
            handler.on_message(topic, payload);
        }
    }
}

/// A connection to a [`MemoryBroker`].
pub struct MemoryTransport {
    broker: Arc<MemoryBroker>,
    session: Mutex<Option<u64>>,
}

impl MemoryTransport {
    fn session_id(&self) -> Result<u64, TransportError> {
        (*self.session.lock()).ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError> {
        {
            let mut state = self.broker.state.lock();
            if state.refuse {
                return Err(TransportError::Refused { code: REFUSED_CODE });
            }
            let id = state.next_session;
            state.next_session += 1;
            state.sessions.insert(
                id,
                Session {
                    handler: Arc::clone(&handler),
                    topics: HashSet::new(),
                },
            );
            *self.session.lock() = Some(id);
        }

        handler.on_connect(CONNECT_ACCEPTED);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8], _qos: QoS) -> Result<(), TransportError> {
        self.session_id()?;
        self.broker.route(topic, payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
        let id = self.session_id()?;
        let mut state = self.broker.state.lock();
        *state.subscribe_counts.entry(topic.to_string()).or_default() += 1;
        if let Some(session) = state.sessions.get_mut(&id) {
            session.topics.insert(topic.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let id = self.session_id()?;
        if let Some(session) = self.broker.state.lock().sessions.get_mut(&id) {
            session.topics.remove(topic);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let id = self.session.lock().take().ok_or(TransportError::NotConnected)?;
        self.broker.state.lock().sessions.remove(&id);
        Ok(())
    }
}
