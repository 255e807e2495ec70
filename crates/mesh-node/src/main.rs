//! # Linkmesh Node
//!
//! Runs one node over MQTT until Ctrl+C.
//!
//! ## Startup Sequence
//!
//! 1. Load and validate configuration from the environment
//! 2. Read the descriptor (`MESH_DESCRIPTOR` or the first argument)
//! 3. Initialize logging and metrics
//! 4. Connect to the broker and start serving requests
//! 5. Wait for Ctrl+C, then stop

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use mesh_bus::MqttTransport;
use mesh_node::{MeshNode, NodeConfig};
use mesh_telemetry::{init_telemetry, TelemetryConfig};
use mesh_types::descriptor::endpoint;
use serde_json::Value;
use tracing::info;

fn load_descriptor(config: &NodeConfig) -> Result<Value> {
    let path = config
        .descriptor_path
        .clone()
        .or_else(|| std::env::args().nth(1).map(PathBuf::from))
        .context("No descriptor given: set MESH_DESCRIPTOR or pass a path")?;

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read descriptor {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Descriptor {} is not valid JSON", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = NodeConfig::from_env().context("Invalid configuration")?;
    config.validate().context("Invalid configuration")?;

    let descriptor = load_descriptor(&config)?;
    let endpoint = endpoint(&descriptor)?.to_string();

    let _telemetry = init_telemetry(&TelemetryConfig::for_node(&endpoint))?;

    let mqtt = config.mqtt_for(&endpoint);
    info!(
        endpoint = %endpoint,
        broker = %format!("{}:{}", mqtt.host, mqtt.port),
        client_id = %mqtt.client_id,
        "Starting node"
    );

    let transport = Arc::new(MqttTransport::new(mqtt));
    let node = MeshNode::connect(transport, descriptor, config.rpc.clone()).await?;

    // Keep the node running
    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    // Graceful shutdown
    node.stop().await;

    Ok(())
}
