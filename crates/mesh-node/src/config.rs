//! # Node Configuration
//!
//! Broker connection settings and request/response tuning, read from the
//! environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `MESH_BROKER_HOST` | `localhost` |
//! | `MESH_BROKER_PORT` | `1883` |
//! | `MESH_KEEPALIVE_SECS` | `20` |
//! | `MESH_CLIENT_ID` | `<endpoint>-<random>` |
//! | `MESH_REQUEST_CAPACITY` | `1024` |
//! | `MESH_RECONNECT_DELAY_MS` | `1000` |
//! | `MESH_QOS` | `1` |
//! | `MESH_GET_RETRIES` | `5` |
//! | `MESH_GET_TIMEOUT_MS` | `500` |
//! | `MESH_DESCRIPTOR` | none |

use mesh_bus::{MqttConfig, QoS};
use mesh_types::create_message_id;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Length of the random suffix of generated client ids.
const CLIENT_ID_SUFFIX_LEN: usize = 8;

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("Invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },

    /// QoS level outside 0..=2.
    #[error("QoS level must be 0, 1 or 2, got {0}")]
    InvalidQos(u8),

    /// Broker port 0.
    #[error("Broker port must be non-zero")]
    ZeroPort,

    /// GET retry budget of 0.
    #[error("GET retries must be at least 1")]
    ZeroRetries,

    /// GET timeout of 0.
    #[error("GET timeout must be non-zero")]
    ZeroTimeout,
}

/// Request/response tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    /// QoS for subscriptions and every publish.
    pub qos: QoS,
    /// Attempts made by `get_with_defaults`.
    pub get_retries: u32,
    /// Wait per attempt in `get_with_defaults`.
    pub get_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            qos: QoS::AtLeastOnce,
            get_retries: 5,
            get_timeout: Duration::from_millis(500),
        }
    }
}

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Broker connection. An empty `client_id` is derived from the endpoint.
    pub mqtt: MqttConfig,
    /// Request/response tuning.
    pub rpc: RpcConfig,
    /// Descriptor file to load.
    pub descriptor_path: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                client_id: String::new(),
                ..MqttConfig::default()
            },
            rpc: RpcConfig::default(),
            descriptor_path: None,
        }
    }
}

impl NodeConfig {
    /// Load from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("MESH_BROKER_HOST") {
            config.mqtt.host = host;
        }
        if let Some(port) = parse(&lookup, "MESH_BROKER_PORT")? {
            config.mqtt.port = port;
        }
        if let Some(secs) = parse(&lookup, "MESH_KEEPALIVE_SECS")? {
            config.mqtt.keep_alive = Duration::from_secs(secs);
        }
        if let Some(client_id) = lookup("MESH_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Some(capacity) = parse(&lookup, "MESH_REQUEST_CAPACITY")? {
            config.mqtt.request_capacity = capacity;
        }
        if let Some(ms) = parse(&lookup, "MESH_RECONNECT_DELAY_MS")? {
            config.mqtt.reconnect_delay = Duration::from_millis(ms);
        }

        if let Some(level) = parse::<u8, _>(&lookup, "MESH_QOS")? {
            config.rpc.qos = QoS::from_level(level).ok_or(ConfigError::InvalidQos(level))?;
        }
        if let Some(retries) = parse(&lookup, "MESH_GET_RETRIES")? {
            config.rpc.get_retries = retries;
        }
        if let Some(ms) = parse(&lookup, "MESH_GET_TIMEOUT_MS")? {
            config.rpc.get_timeout = Duration::from_millis(ms);
        }

        config.descriptor_path = lookup("MESH_DESCRIPTOR").map(PathBuf::from);
        Ok(config)
    }

    /// Reject settings the node cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.rpc.get_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.rpc.get_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Broker settings for `endpoint`, filling in a client id if none was
    /// configured.
    #[must_use]
    pub fn mqtt_for(&self, endpoint: &str) -> MqttConfig {
        let mut mqtt = self.mqtt.clone();
        if mqtt.client_id.is_empty() {
            let suffix: String = create_message_id()
                .chars()
                .take(CLIENT_ID_SUFFIX_LEN)
                .collect();
            mqtt.client_id = format!("{endpoint}-{suffix}");
        }
        mqtt
    }
}

fn parse<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
