//! MQTT adapter (rumqttc)
//!
//! The connection is checked once at startup; failing to reach the broker
//! then is fatal. Afterwards the event loop runs in its own task and
//! reconnects after a fixed backoff, re-subscribing on every ConnAck.

use super::{BusMessage, MessageBus, Topics};
use crate::error::{Error, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Delay before polling again after a connection error
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Time allowed for the first ConnAck
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Inbound channel capacity between the event loop and the listener
    pub inbound_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "yardwatch".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            inbound_capacity: 256,
        }
    }
}

/// MQTT-backed message bus
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

impl MqttBus {
    /// Connect, subscribe to camera topics and spawn the event loop task
    pub async fn connect(
        config: &MqttConfig,
        topics: Topics,
        shutdown: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<BusMessage>)> {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        // Snapshot payloads are full JPEG frames
        options.set_max_packet_size(16 * 1024 * 1024, 16 * 1024 * 1024);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut event_loop) = AsyncClient::new(options, 64);

        wait_for_connack(&mut event_loop).await?;
        tracing::info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "Connected to MQTT broker"
        );

        subscribe_all(&client, &topics)?;

        let (tx, rx) = mpsc::channel(config.inbound_capacity);
        tokio::spawn(drive_event_loop(event_loop, client.clone(), topics, tx, shutdown));

        Ok((Self { client }, rx))
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| Error::Bus(format!("publish to {} failed: {}", topic, e)))
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<()> {
    let connect = async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(Error::Bus(format!("MQTT connect failed: {}", e))),
            }
        }
    };

    tokio::time::timeout(CONNECT_TIMEOUT, connect)
        .await
        .map_err(|_| Error::Timeout("MQTT connect".to_string()))?
}

fn subscribe_all(client: &AsyncClient, topics: &Topics) -> Result<()> {
    for filter in [topics.motion_filter(), topics.image_filter()] {
        client
            .try_subscribe(&filter, QoS::AtLeastOnce)
            .map_err(|e| Error::Bus(format!("subscribe to {} failed: {}", filter, e)))?;
        tracing::debug!(filter = %filter, "MQTT subscription requested");
    }
    Ok(())
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    topics: Topics,
    tx: mpsc::Sender<BusMessage>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = BusMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                if tx.send(message).await.is_err() {
                    tracing::warn!("Bus listener gone, stopping MQTT event loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("MQTT reconnected, re-subscribing");
                if let Err(e) = subscribe_all(&client, &topics) {
                    tracing::error!(error = %e, "MQTT re-subscribe failed");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    backoff_sec = RECONNECT_BACKOFF.as_secs(),
                    "MQTT connection error, retrying"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                }
            }
        }
    }

    if let Err(e) = client.try_disconnect() {
        tracing::debug!(error = %e, "MQTT disconnect request failed");
    }
    tracing::info!("MQTT event loop stopped");
}
