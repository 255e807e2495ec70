//! # Blocking Queue
//!
//! Multi-producer, multi-consumer FIFO. `enqueue` never waits; `dequeue`
//! suspends the calling task until an item is available.
//!
//! Every hand-off in the crate goes through this type: the publish queue,
//! the modification queue, and the per-subscription delivery queues returned
//! by [`crate::PubSubClient::subscribe`].

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Thread-safe FIFO with blocking and timed-blocking dequeue.
pub struct Queue<T> {
    items: Mutex<VecDeque<T>>,
    available: Notify,
}

impl<T> Queue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    /// Append an item. Never blocks and always succeeds.
    pub fn enqueue(&self, item: T) {
        self.items.lock().push_back(item);
        self.available.notify_one();
    }

    /// Take the front item if one is ready.
    pub fn try_dequeue(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Wait until an item is available and take it.
    pub async fn dequeue(&self) -> T {
        loop {
            // Register interest before checking, so an enqueue between the
            // check and the await still wakes us.
            let notified = self.available.notified();
            if let Some(item) = self.try_dequeue() {
                return item;
            }
            notified.await;
        }
    }

    /// Wait up to `timeout` for an item.
    ///
    /// Returns `None` if the deadline passes first. Wake-ups that find the
    /// queue empty go back to waiting for the remainder of the original
    /// deadline, never a fresh full timeout.
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            if let Some(item) = self.try_dequeue() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_dequeue();
            }
        }
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Check if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}
