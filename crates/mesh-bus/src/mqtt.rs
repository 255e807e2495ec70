//! # MQTT Transport
//!
//! [`Transport`] over `rumqttc`. The event loop runs on a dedicated tokio task;
//! inbound PUBLISH and CONNACK packets are forwarded to the registered
//! [`TransportHandler`] from that task.
//!
//! Reconnection is rumqttc's: after a connection error the next `poll`
//! reconnects. Each successful reconnect yields a CONNACK, which the client
//! uses to restore its subscriptions.
//!
//! Requests go through rumqttc's bounded request channel with the awaiting
//! `AsyncClient` methods. While the event loop is backing off or the inflight
//! window is full, callers wait for room instead of losing the request.

use crate::transport::{QoS, Transport, TransportError, TransportHandler, CONNECT_ACCEPTED};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connection settings for [`MqttTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    /// Broker host name or address.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// MQTT client identifier.
    pub client_id: String,
    /// Keepalive interval.
    pub keep_alive: Duration,
    /// Start every connection with a clean session.
    pub clean_session: bool,
    /// Capacity of the channel between `AsyncClient` and the event loop.
    /// Requests wait for room when it is full.
    pub request_capacity: usize,
    /// Pause after a connection error before polling again.
    pub reconnect_delay: Duration,
    /// Bound on the initial CONNECT/CONNACK exchange.
    pub connect_timeout: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "linkmesh".to_string(),
            keep_alive: Duration::from_secs(20),
            clean_session: true,
            request_capacity: 1024,
            reconnect_delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl MqttConfig {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(self.clean_session);
        options
    }
}

/// MQTT broker connection.
pub struct MqttTransport {
    config: MqttConfig,
    client: Mutex<Option<AsyncClient>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Create a transport; nothing is connected until [`Transport::connect`].
    #[must_use]
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
            event_loop: Mutex::new(None),
        }
    }

    /// Connection settings.
    #[must_use]
    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    fn client(&self) -> Result<AsyncClient, TransportError> {
        self.client
            .lock()
            .clone()
            .ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError> {
        let (client, mut event_loop) =
            AsyncClient::new(self.config.options(), self.config.request_capacity);

        info!(
            host = %self.config.host,
            port = self.config.port,
            client_id = %self.config.client_id,
            "Connecting to MQTT broker"
        );

        tokio::time::timeout(self.config.connect_timeout, wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| TransportError::Timeout)??;

        *self.client.lock() = Some(client);
        handler.on_connect(CONNECT_ACCEPTED);

        let task = tokio::spawn(drive(event_loop, handler, self.config.reconnect_delay));
        *self.event_loop.lock() = Some(task);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError> {
        self.client()?
            .publish(topic, to_mqtt_qos(qos), false, payload.to_vec())
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.client()?
            .subscribe(topic, to_mqtt_qos(qos))
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client()?
            .unsubscribe(topic)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let client = self.client.lock().take().ok_or(TransportError::NotConnected)?;
        let task = self.event_loop.lock().take();

        // The request channel may still be full if the broker went away.
        match tokio::time::timeout(self.config.connect_timeout, client.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to send DISCONNECT"),
            Err(_) => warn!("Timed out queueing DISCONNECT"),
        }

        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.config.connect_timeout, task)
                .await
                .is_err()
            {
                warn!("MQTT event loop did not stop; aborting");
                abort.abort();
            }
        }

        info!("Disconnected from MQTT broker");
        Ok(())
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let code = return_code(ack.code);
                if code != CONNECT_ACCEPTED {
                    return Err(TransportError::Refused { code });
                }
                return Ok(());
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(TransportError::Refused {
                    code: return_code(code),
                });
            }
            Err(e) => return Err(TransportError::Connect(e.to_string())),
        }
    }
}

async fn drive(
    mut event_loop: EventLoop,
    handler: Arc<dyn TransportHandler>,
    reconnect_delay: Duration,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handler.on_message(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(session_present = ack.session_present, "Reconnected to MQTT broker");
                handler.on_connect(return_code(ack.code));
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT event loop finished");
                break;
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                handler.on_connect(return_code(code));
                tokio::time::sleep(reconnect_delay).await;
            }
            Err(e) => {
                error!(error = %e, "MQTT connection error; retrying");
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn return_code(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}
