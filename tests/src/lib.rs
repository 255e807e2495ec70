//! # Linkmesh Test Suite
//!
//! Multi-node scenarios run over the in-memory broker.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── fixtures.rs   # Broker and node setup
//!     ├── rpc.rs        # GET/PUT between nodes, retries and timeouts
//!     └── streams.rs    # Publish/subscribe, reconnects, concurrency
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p mesh-tests
//! cargo test -p mesh-tests integration::rpc::
//! ```

pub mod integration;
