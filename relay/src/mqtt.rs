use crate::errors::Result;
use crate::metrics::{MESSAGES_TOTAL, PARSE_FAILURES_TOTAL};
use crate::orchestrator::RelayHandle;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use telemetry_protocol::{Backoff, OperatingMode};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub telemetry_topic: String,
    pub mode_topic: String,
}

/// Subscribes to telemetry and publishes derived mode changes.
///
/// rumqttc reconnects on the next poll after an error; the subscription is
/// renewed on every ConnAck. Returns only when the orchestrator is gone.
pub async fn run_mqtt(
    settings: MqttSettings,
    relay: RelayHandle,
    mut modes: mpsc::Receiver<OperatingMode>,
    mut backoff: impl Backoff,
) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", settings.broker, settings.port);

    let mut mqtt_options = MqttOptions::new(settings.client_id, settings.broker, settings.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10000);

    let publisher = client.clone();
    let mode_topic = settings.mode_topic;
    tokio::spawn(async move {
        while let Some(mode) = modes.recv().await {
            match publisher
                .publish(&mode_topic, QoS::AtMostOnce, false, mode.as_str())
                .await
            {
                Ok(()) => info!("Published mode {} to {}", mode, mode_topic),
                Err(e) => warn!("Failed to publish mode {}: {}", mode, e),
            }
        }
    });

    let topic = settings.telemetry_topic;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                backoff.reset();
                client.try_subscribe(&topic, QoS::AtMostOnce)?;
                info!("Subscribed to {}", topic);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == topic => {
                MESSAGES_TOTAL.inc();
                debug!(
                    "Received message on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );

                match String::from_utf8(publish.payload.to_vec()) {
                    Ok(raw) => relay.submit_telemetry(raw).await?,
                    Err(e) => {
                        PARSE_FAILURES_TOTAL.inc();
                        warn!("Dropping non UTF-8 telemetry: {}", e);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                let delay = backoff.next_delay();
                error!("MQTT error: {}. Reconnecting in {:?}", e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
