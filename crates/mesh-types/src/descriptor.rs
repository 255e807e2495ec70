//! # Node Descriptors
//!
//! A descriptor declares the links a node owns and the links it needs from
//! other nodes:
//!
//! ```json
//! {
//!   "endpoint": "node",
//!   "links": {
//!     "/0": { "type": "STREAM" },
//!     "/1": { "links": { "/2": { "type": "DATA" } } }
//!   },
//!   "requests": [ { "link": "other/data", "type": "DATA", "required": true } ]
//! }
//! ```
//!
//! Resolution walks `links` depth first. A key beginning with `/` is appended
//! to its parent's path; any other key is taken as an absolute path, which must
//! still lie inside the parent's namespace. The example resolves to
//! `{"node/0": STREAM, "node/1/2": DATA}`.

use crate::errors::DescriptorError;
use crate::link::LinkKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Flat mapping from fully-qualified link to its kind.
pub type ResolvedLinks = HashMap<String, LinkKind>;

/// A link on another node that this node depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestData {
    /// Fully-qualified remote link.
    pub link: String,
    /// Whether the node cannot operate without this link.
    #[serde(default)]
    pub required: bool,
    /// Kind of the remote link.
    #[serde(rename = "type")]
    pub kind: LinkKind,
}

/// Returns true if `path` is a prefix of `link`.
///
/// The empty path is a prefix of everything.
#[must_use]
pub fn is_subpath_of(link: &str, path: &str) -> bool {
    link.starts_with(path)
}

/// Joins `path` onto `base` when it is relative (starts with `/`).
///
/// An empty `path` names `base` itself; any other path is already absolute.
#[must_use]
pub fn to_absolute_path(base: &str, path: &str) -> String {
    if path.is_empty() {
        base.to_string()
    } else if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        path.to_string()
    }
}

/// Reads the `endpoint` of a descriptor.
pub fn endpoint(descriptor: &Value) -> Result<&str, DescriptorError> {
    descriptor
        .get("endpoint")
        .and_then(Value::as_str)
        .ok_or(DescriptorError::MissingEndpoint)
}

/// Resolves every leaf of the descriptor's `links` tree.
///
/// # Errors
///
/// Fails as a whole (no partial map) if the endpoint is missing, a leaf has
/// no `type`, a `type` is not DATA/STREAM, or a path escapes its parent.
pub fn resolve_descriptor(descriptor: &Value) -> Result<ResolvedLinks, DescriptorError> {
    let endpoint = endpoint(descriptor)?;
    let mut resolved = ResolvedLinks::new();
    resolve_node("", endpoint, descriptor, &mut resolved)?;
    Ok(resolved)
}

fn resolve_node(
    parent: &str,
    key: &str,
    node: &Value,
    resolved: &mut ResolvedLinks,
) -> Result<(), DescriptorError> {
    let link = to_absolute_path(parent, key);

    if !is_subpath_of(&link, parent) {
        return Err(DescriptorError::OutsideParent {
            link,
            parent: parent.to_string(),
        });
    }

    let Some(fields) = node.as_object() else {
        return Err(DescriptorError::NotAnObject { link });
    };

    let children = match fields.get("links") {
        None | Some(Value::Null) => None,
        Some(Value::Object(children)) if children.is_empty() => None,
        Some(Value::Object(children)) => Some(children),
        Some(_) => return Err(DescriptorError::NotAnObject { link }),
    };

    match children {
        Some(children) => {
            for (child_key, child) in children {
                resolve_node(&link, child_key, child, resolved)?;
            }
        }
        None => {
            let kind = match fields.get("type") {
                None | Some(Value::Null) => return Err(DescriptorError::MissingType { link }),
                Some(Value::String(raw)) => {
                    raw.parse::<LinkKind>()
                        .map_err(|_| DescriptorError::UnknownType {
                            link: link.clone(),
                            value: raw.clone(),
                        })?
                }
                Some(other) => {
                    return Err(DescriptorError::UnknownType {
                        link,
                        value: other.to_string(),
                    })
                }
            };
            resolved.insert(link, kind);
        }
    }

    Ok(())
}

/// Reads the descriptor's `requests` list.
///
/// An absent or `null` list means the node depends on nothing.
///
/// # Errors
///
/// Fails as a whole if the list is not an array or any entry lacks `link` or
/// a recognised `type`.
pub fn get_requests(descriptor: &Value) -> Result<Vec<RequestData>, DescriptorError> {
    let entries = match descriptor.get("requests") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            return Err(DescriptorError::MalformedRequests(format!(
                "expected an array, found {other}"
            )))
        }
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            RequestData::deserialize(entry).map_err(|e| {
                DescriptorError::MalformedRequests(format!("entry {index}: {e}"))
            })
        })
        .collect()
}
