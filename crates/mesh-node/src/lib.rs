//! # Mesh Node Library
//!
//! A node declares its links in a JSON descriptor and exchanges data with
//! other nodes through a shared broker. The `main.rs` binary runs one node
//! over MQTT; tests run any number of them over an in-memory broker.
//!
//! ## Modules
//!
//! - `capabilities` - which links a node may publish, put, get or subscribe
//! - `config` - broker and request/response settings from the environment
//! - `handler` - serving inbound GET/PUT requests
//! - `node` - the [`MeshNode`] operations

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod capabilities;
pub mod config;
pub mod handler;
pub mod node;

pub use capabilities::LinkCapabilities;
pub use config::{ConfigError, NodeConfig, RpcConfig};
pub use handler::LocalData;
pub use node::{MeshNode, NodeError};
