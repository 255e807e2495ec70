//! # Mesh Types Crate
//!
//! Domain types shared by every layer of a linkmesh node.
//!
//! ## Contents
//!
//! - **Links**: [`LinkKind`] and the topic naming convention
//!   (`<node>/requests`, `<node>/responses/<id>`, `<node>/node_descriptor`).
//! - **Descriptors**: resolution of a declarative descriptor tree into a flat
//!   `link -> kind` map, plus the list of links required from other nodes.
//! - **Envelopes**: the JSON request and response bodies carried over the bus.
//!
//! ## Design Principles
//!
//! - **Wire contract lives here**: topic strings are only ever built through
//!   the helpers in [`link`], so both ends of an exchange agree on them.
//! - **No partial results**: descriptor resolution either yields a complete
//!   map or an error.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod descriptor;
pub mod envelope;
pub mod errors;
pub mod link;

pub use descriptor::{get_requests, resolve_descriptor, RequestData, ResolvedLinks};
pub use envelope::{Method, Request, Response};
pub use errors::*;
pub use link::*;
