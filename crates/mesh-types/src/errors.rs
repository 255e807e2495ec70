//! # Error Types
//!
//! Errors raised while interpreting descriptors and envelopes.

use thiserror::Error;

/// Errors that can occur while resolving a node descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// The descriptor has no `endpoint` key, or it is not a string.
    #[error("Descriptor is missing a string `endpoint`")]
    MissingEndpoint,

    /// A descriptor node (or the `links` map) is not a JSON object.
    #[error("Descriptor entry for {link} is not an object")]
    NotAnObject { link: String },

    /// A leaf link has no `type` key.
    #[error("Leaf link {link} has no type")]
    MissingType { link: String },

    /// A `type` value is neither DATA nor STREAM.
    #[error("Unknown link type {value:?} for {link}")]
    UnknownType { link: String, value: String },

    /// A child path escapes its parent namespace.
    #[error("Link {link} is not nested under {parent}")]
    OutsideParent { link: String, parent: String },

    /// The `requests` list is malformed.
    #[error("Malformed requests list: {0}")]
    MalformedRequests(String),
}

/// Errors that can occur while decoding an inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The payload is not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// A required field is absent or has the wrong JSON type.
    #[error("Missing or invalid field `{0}`")]
    MissingField(&'static str),

    /// The `method` field is not GET or PUT.
    #[error("Unsupported method {0:?}")]
    UnknownMethod(String),

    /// A response's `type` is neither DATA nor STREAM.
    #[error("Unknown link type {0:?}")]
    UnknownType(String),
}
