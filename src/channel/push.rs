use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::Value;
use tracing::warn;

use crate::config::Config;

/// Topic carrying device telemetry: `devices/<device_id>/telemetry`.
pub const TELEMETRY_TOPIC: &str = "devices/+/telemetry";

#[derive(Debug)]
pub enum PushEvent {
    Connected,
    Disconnected,
    Message {
        payload: Value,
        /// Device id recovered from the topic, used when the payload has none.
        device_hint: Option<String>,
    },
}

/// Event-driven side of the update channel. The transport owns its own
/// connection lifecycle (including reconnection); consumers only see the
/// event stream.
#[async_trait]
pub trait PushTransport: Send {
    async fn next_event(&mut self) -> PushEvent;
}

// ---------------------------------------------------------------------------
// MQTT implementation
// ---------------------------------------------------------------------------

pub struct MqttPushTransport {
    eventloop: EventLoop,
    // Dropping the client tears down the subscription; keep it alive for the
    // lifetime of the transport.
    _client: AsyncClient,
}

impl MqttPushTransport {
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut options = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_host.clone(),
            config.mqtt_port,
        );
        options.set_keep_alive(Duration::from_secs(30));

        let (client, eventloop) = AsyncClient::new(options, 20);
        client.subscribe(TELEMETRY_TOPIC, QoS::AtLeastOnce).await?;

        Ok(Self {
            eventloop,
            _client: client,
        })
    }
}

#[async_trait]
impl PushTransport for MqttPushTransport {
    async fn next_event(&mut self) -> PushEvent {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return PushEvent::Connected,
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Some(event) = decode_publish(&publish.topic, &publish.payload) {
                        return event;
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => return PushEvent::Disconnected,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt error; waiting for the client to reconnect");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    return PushEvent::Disconnected;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Extract device_id from "devices/<device_id>/telemetry".
pub(crate) fn extract_device_id(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "devices" && parts[2] == "telemetry" && !parts[1].is_empty()
    {
        Some(parts[1])
    } else {
        None
    }
}

/// Decode a publish into a message event; malformed JSON is logged and
/// dropped.
pub(crate) fn decode_publish(topic: &str, payload: &[u8]) -> Option<PushEvent> {
    let device_hint = extract_device_id(topic).map(str::to_owned);
    match serde_json::from_slice::<Value>(payload) {
        Ok(value) => Some(PushEvent::Message {
            payload: value,
            device_hint,
        }),
        Err(e) => {
            warn!(topic = %topic, error = %e, "bad telemetry json");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
