use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use telemetry_protocol::{Backoff, OperatingMode, ParseError};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Drives the MQTT connection forever and forwards mode assignments.
///
/// The mode subscription is renewed on every ConnAck because the session is
/// not persisted across reconnects.
pub async fn run_eventloop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    mode_topic: String,
    tx: mpsc::Sender<OperatingMode>,
    mut backoff: impl Backoff,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker");
                backoff.reset();
                if let Err(e) = client.try_subscribe(&mode_topic, QoS::AtMostOnce) {
                    error!("Failed to subscribe to {}: {}", mode_topic, e);
                } else {
                    info!("Subscribed to {}", mode_topic);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == mode_topic => {
                match decode_mode(&publish.payload) {
                    Ok(mode) => {
                        if tx.send(mode).await.is_err() {
                            warn!("Mode receiver dropped");
                        }
                    }
                    Err(e) => warn!("Ignoring mode message: {}", e),
                }
            }
            Ok(_) => {}
            Err(e) => {
                let delay = backoff.next_delay();
                error!("MQTT eventloop error: {}. Reconnecting in {:?}", e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

pub fn decode_mode(payload: &[u8]) -> Result<OperatingMode, ParseError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| ParseError::UnknownMode(String::from_utf8_lossy(payload).into_owned()))?;
    text.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_mode() {
        assert_eq!(decode_mode(b"WARNING").unwrap(), OperatingMode::Warning);
        assert_eq!(decode_mode(b"CRITICAL\n").unwrap(), OperatingMode::Critical);
        assert!(decode_mode(b"PANIC").is_err());
        assert!(decode_mode(&[0xff, 0xfe]).is_err());
    }
}
