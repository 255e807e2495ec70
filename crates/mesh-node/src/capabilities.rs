//! # Link Capabilities
//!
//! What a node may do with each link, derived once from its descriptor:
//!
//! | Set           | Source                         | Kind   |
//! |---------------|--------------------------------|--------|
//! | publishable   | own `links`                    | STREAM |
//! | puttable      | own `links`, minus descriptor  | DATA   |
//! | gettable      | `requests`                     | DATA   |
//! | subscribable  | `requests`                     | STREAM |
//!
//! The reserved `<endpoint>/node_descriptor` link is always present as a
//! local DATA link but is never puttable.

use mesh_types::descriptor::{endpoint, get_requests, resolve_descriptor};
use mesh_types::{descriptor_link, DescriptorError, LinkKind, ResolvedLinks};
use serde_json::Value;
use std::collections::HashSet;

/// Capability sets of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCapabilities {
    endpoint: String,
    links: ResolvedLinks,
    publishable: HashSet<String>,
    puttable: HashSet<String>,
    gettable: HashSet<String>,
    subscribable: HashSet<String>,
}

impl LinkCapabilities {
    /// Resolve a descriptor into capability sets.
    ///
    /// # Errors
    ///
    /// Returns the first descriptor problem found; nothing is partially
    /// resolved.
    pub fn from_descriptor(descriptor: &Value) -> Result<Self, DescriptorError> {
        let endpoint = endpoint(descriptor)?.to_string();
        let mut links = resolve_descriptor(descriptor)?;
        let requests = get_requests(descriptor)?;

        let descriptor_link = descriptor_link(&endpoint);
        links.insert(descriptor_link.clone(), LinkKind::Data);

        let of_kind = |kind: LinkKind| -> HashSet<String> {
            links
                .iter()
                .filter(|(_, k)| **k == kind)
                .map(|(link, _)| link.clone())
                .collect()
        };
        let publishable = of_kind(LinkKind::Stream);
        let mut puttable = of_kind(LinkKind::Data);
        puttable.remove(&descriptor_link);

        let mut gettable = HashSet::new();
        let mut subscribable = HashSet::new();
        for request in requests {
            match request.kind {
                LinkKind::Data => gettable.insert(request.link),
                LinkKind::Stream => subscribable.insert(request.link),
            };
        }

        Ok(Self {
            endpoint,
            links,
            publishable,
            puttable,
            gettable,
            subscribable,
        })
    }

    /// The node's endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Kind of a local link, if the node owns it.
    #[must_use]
    pub fn kind_of(&self, link: &str) -> Option<LinkKind> {
        self.links.get(link).copied()
    }

    /// All local links.
    #[must_use]
    pub fn links(&self) -> &ResolvedLinks {
        &self.links
    }

    #[must_use]
    pub fn is_publishable(&self, link: &str) -> bool {
        self.publishable.contains(link)
    }

    #[must_use]
    pub fn is_puttable(&self, link: &str) -> bool {
        self.puttable.contains(link)
    }

    #[must_use]
    pub fn is_gettable(&self, link: &str) -> bool {
        self.gettable.contains(link)
    }

    #[must_use]
    pub fn is_subscribable(&self, link: &str) -> bool {
        self.subscribable.contains(link)
    }
}
