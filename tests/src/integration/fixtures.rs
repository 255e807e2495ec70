//! Shared setup for multi-node tests.

use std::sync::Arc;
use std::time::Duration;

use mesh_bus::{MemoryBroker, QoS};
use mesh_node::{MeshNode, RpcConfig};
use serde_json::{json, Value};

/// Per-attempt wait used by most tests.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_millis(200);

pub fn rpc() -> RpcConfig {
    RpcConfig {
        qos: QoS::AtLeastOnce,
        get_retries: 3,
        get_timeout: ATTEMPT_TIMEOUT,
    }
}

pub async fn start(broker: &Arc<MemoryBroker>, descriptor: Value) -> MeshNode {
    MeshNode::connect(Arc::new(broker.transport()), descriptor, rpc())
        .await
        .expect("node failed to start")
}

/// Owns `owner/value` (DATA) and `owner/feed` (STREAM).
pub fn owner_descriptor() -> Value {
    json!({
        "endpoint": "owner",
        "links": {
            "/value": { "type": "DATA" },
            "/feed": { "type": "STREAM" }
        },
        "requests": []
    })
}

/// Requests everything `owner` offers, plus links nobody can serve.
pub fn requester_descriptor() -> Value {
    json!({
        "endpoint": "requester",
        "links": {
            "/status": { "type": "STREAM" }
        },
        "requests": [
            { "link": "owner/value", "type": "DATA", "required": true },
            { "link": "owner/node_descriptor", "type": "DATA" },
            { "link": "owner/feed", "type": "STREAM" },
            { "link": "owner/missing", "type": "DATA" },
            { "link": "ghost/value", "type": "DATA" }
        ]
    })
}

/// Poll `condition` until it holds.
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timeout");
}
