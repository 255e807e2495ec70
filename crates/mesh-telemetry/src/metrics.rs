//! Prometheus metrics for linkmesh nodes.
//!
//! All metrics follow the naming convention: `linkmesh_<area>_<metric>_<unit>`
//!
//! Counters are process-wide. Several nodes in one process (as in tests)
//! share them.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // PUB/SUB METRICS
    // =========================================================================

    /// Messages handed to the publish queue
    pub static ref MESSAGES_PUBLISHED: IntCounter = IntCounter::new(
        "linkmesh_messages_published_total",
        "Messages queued for publication by this process"
    ).expect("metric creation failed");

    /// Messages received on node request topics
    pub static ref MESSAGES_RECEIVED: IntCounter = IntCounter::new(
        "linkmesh_messages_received_total",
        "Inbound request messages received"
    ).expect("metric creation failed");

    // =========================================================================
    // RPC METRICS
    // =========================================================================

    /// Inbound requests answered, by method
    pub static ref REQUESTS_SERVED: IntCounterVec = IntCounterVec::new(
        Opts::new("linkmesh_rpc_requests_served_total", "Inbound requests answered"),
        &["method"]  // method: GET/PUT
    ).expect("metric creation failed");

    /// Inbound requests dropped without a response, by reason
    pub static ref REQUESTS_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("linkmesh_rpc_requests_dropped_total", "Inbound requests dropped without response"),
        &["reason"]  // reason: malformed/unknown_link/not_puttable/encode
    ).expect("metric creation failed");

    /// Outbound requests that exhausted every attempt
    pub static ref GET_TIMEOUTS: IntCounter = IntCounter::new(
        "linkmesh_rpc_timeouts_total",
        "Outbound requests that received no response within the retry budget"
    ).expect("metric creation failed");

    /// Outbound request attempts after the first
    pub static ref GET_RETRIES: IntCounter = IntCounter::new(
        "linkmesh_rpc_retries_total",
        "Outbound request attempts beyond the first"
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Pub/sub
        Box::new(MESSAGES_PUBLISHED.clone()),
        Box::new(MESSAGES_RECEIVED.clone()),
        // RPC
        Box::new(REQUESTS_SERVED.clone()),
        Box::new(REQUESTS_DROPPED.clone()),
        Box::new(GET_TIMEOUTS.clone()),
        Box::new(GET_RETRIES.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
