//! MQTT boundary: inbound credential topics in, lock topics out.
//!
//! The door engine only knows the [`Publisher`] trait. Reconnection is the
//! adapter's job; rumqttc reconnects on the next `poll` after an error, and
//! subscriptions are re-issued on every ConnAck.

use std::time::Duration;

use doorward_core::controller::{TOPIC_FACE_RECOGNITION, TOPIC_RFID};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use thiserror::Error;

use crate::config::Config;
use crate::engine::DoorHandle;

/// Pause between reconnect attempts after a connection error.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
/// Capacity of the rumqttc request queue.
const REQUEST_QUEUE: usize = 32;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Outbound side of the bus as seen by the door engine.
pub trait Publisher: Send + 'static {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError>;
}

/// Queues publishes on the rumqttc client without awaiting the network.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!(topic, payload, "published");
        Ok(())
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Rfid(String),
    FaceVerdict(String),
}

/// Map a raw MQTT message onto a door event. Unknown topics and non-UTF-8
/// payloads yield `None`. Tags are trimmed; verdicts are passed on verbatim.
pub fn route(topic: &str, payload: &[u8]) -> Option<Inbound> {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(topic, error = %e, "dropping non UTF-8 payload");
            return None;
        }
    };

    match topic {
        TOPIC_RFID => Some(Inbound::Rfid(text.trim().to_string())),
        TOPIC_FACE_RECOGNITION => Some(Inbound::FaceVerdict(text.to_string())),
        _ => {
            tracing::debug!(topic, "ignoring message on unexpected topic");
            None
        }
    }
}

/// Forward an inbound message to the door engine.
pub fn dispatch(door: &DoorHandle, inbound: Inbound) {
    let sent = match inbound {
        Inbound::Rfid(tag) => door.rfid_presented(tag),
        Inbound::FaceVerdict(verdict) => door.face_verdict(verdict),
    };
    if let Err(e) = sent {
        tracing::error!(error = %e, "door engine unavailable; message dropped");
    }
}

pub fn mqtt_options(config: &Config) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    options
}

/// Create the MQTT client and its event loop. Nothing touches the network
/// until the event loop is polled.
pub fn connect(config: &Config) -> (AsyncClient, EventLoop) {
    AsyncClient::new(mqtt_options(config), REQUEST_QUEUE)
}

fn subscribe_all(client: &AsyncClient) {
    for topic in [TOPIC_RFID, TOPIC_FACE_RECOGNITION] {
        if let Err(e) = client.try_subscribe(topic, QoS::AtLeastOnce) {
            tracing::error!(topic, error = %e, "subscribe failed");
        }
    }
}

/// Drive the MQTT event loop forever, feeding inbound messages to `door`.
pub async fn run_adapter(client: AsyncClient, mut eventloop: EventLoop, door: DoorHandle) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("connected to broker");
                subscribe_all(&client);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(topic = %publish.topic, bytes = publish.payload.len(), "message received");
                if let Some(inbound) = route(&publish.topic, &publish.payload) {
                    dispatch(&door, inbound);
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "broker connection error; retrying");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}
