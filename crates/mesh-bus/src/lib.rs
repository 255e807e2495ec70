//! # Mesh Bus - Asynchronous Pub/Sub Client
//!
//! Wraps a fire-and-forget broker transport in a client that is safe to use
//! from any number of tasks while the transport delivers messages from tasks
//! of its own.
//!
//! ## Architecture
//!
//! ```text
//!  callers ──publish()──────────────→ [publish queue] ──→ publish worker ──→ Transport
//!                                          ▲
//!                                          │ SUBSCRIBE / UNSUBSCRIBE
//!  callers ──subscribe()/unsubscribe()──┐  │
//!  Transport ──on_message/on_connect────┼──→ [modification queue]
//!                                       │            │
//!                                       │            ▼
//!                                       │   modification worker
//!                                       │   (sole owner of the
//!                                       └── subscription table)
//! ```
//!
//! ## Rules
//!
//! - **Single writer**: only the modification worker touches the subscription
//!   table. Everyone else enqueues closures.
//! - **Non-blocking publish**: `publish` enqueues and returns; network I/O
//!   happens on the publish worker, the only task that waits on the
//!   transport.
//! - **Resubscribe on reconnect**: brokers drop subscriptions with the
//!   session, so every accepted CONNACK triggers a resubscribe of the whole table.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod client;
pub mod memory;
pub mod mqtt;
pub mod publisher;
pub mod queue;
pub mod subscriber;
pub mod transport;
pub mod worker;

// Re-export main types
pub use client::{ClientError, PubSubClient};
pub use memory::{MemoryBroker, MemoryTransport, PublishedMessage};
pub use mqtt::{MqttConfig, MqttTransport};
pub use publisher::Publisher;
pub use queue::Queue;
pub use subscriber::{queue_callback, Callback, SubscriptionTable};
pub use transport::{QoS, Transport, TransportError, TransportHandler, CONNECT_ACCEPTED};
pub use worker::{Worker, WorkerError, WorkerHandle};
