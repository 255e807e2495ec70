//! # Subscription Table
//!
//! Topic → callback map, owned by the client's modification worker. Every
//! method here runs on that worker, so the table is never shared.
//!
//! The table never talks to the transport itself. SUBSCRIBE and UNSUBSCRIBE
//! requests are queued on the publish worker, which may wait on a backed-up
//! connection; the modification worker never does.
//!
//! Queue-based subscriptions are ordinary callbacks that push onto a
//! [`Queue`]; see [`queue_callback`].

use crate::client::ClientError;
use crate::publisher::{Ack, Publisher};
use crate::queue::Queue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Inbound message callback: `(topic, payload)`.
pub type Callback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Build a callback that pushes each payload onto `queue`.
#[must_use]
pub fn queue_callback(queue: Arc<Queue<String>>) -> Callback {
    Arc::new(move |_topic: &str, payload: &str| {
        queue.enqueue(payload.to_string());
    })
}

/// The client's subscriptions.
pub struct SubscriptionTable {
    entries: HashMap<String, Callback>,
    outbound: Publisher,
}

impl SubscriptionTable {
    pub(crate) fn new(outbound: Publisher) -> Self {
        Self {
            entries: HashMap::new(),
            outbound,
        }
    }

    /// Register `callback` for `topic` and queue a SUBSCRIBE.
    ///
    /// Replaces any previous callback for the topic. `ack` resolves once the
    /// transport has taken the request.
    pub(crate) fn insert(
        &mut self,
        topic: String,
        callback: Callback,
        ack: Option<Ack>,
    ) -> Result<(), ClientError> {
        self.outbound.subscribe(topic.clone(), ack)?;
        debug!(topic = %topic, "Subscription registered");
        self.entries.insert(topic, callback);
        Ok(())
    }

    /// Drop the entry for `topic` and queue an UNSUBSCRIBE.
    pub(crate) fn remove(&mut self, topic: &str, ack: Option<Ack>) -> Result<(), ClientError> {
        if self.entries.remove(topic).is_none() {
            debug!(topic, "Unsubscribe for unknown topic");
        }
        self.outbound.unsubscribe(topic.to_string(), ack)
    }

    /// Drop the entry for `topic` without contacting the broker.
    ///
    /// Used when the broker never accepted the SUBSCRIBE.
    pub fn discard(&mut self, topic: &str) -> bool {
        self.entries.remove(topic).is_some()
    }

    /// Queue a SUBSCRIBE for every registered topic, once each.
    ///
    /// Returns how many requests were queued.
    pub fn resubscribe_all(&self) -> usize {
        let mut queued = 0;
        for topic in self.entries.keys() {
            match self.outbound.subscribe(topic.clone(), None) {
                Ok(()) => queued += 1,
                Err(e) => warn!(topic = %topic, error = %e, "Resubscribe not queued"),
            }
        }
        debug!(queued, total = self.entries.len(), "Resubscribing after connect");
        queued
    }

    /// Invoke the callback registered for `topic`, if any.
    ///
    /// Returns whether a callback ran.
    pub fn dispatch(&self, topic: &str, payload: &str) -> bool {
        match self.entries.get(topic) {
            Some(callback) => {
                callback(topic, payload);
                true
            }
            None => {
                trace!(topic, "No subscription for topic");
                false
            }
        }
    }

    /// Registered topics, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.entries.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Number of registered topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no topics are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
