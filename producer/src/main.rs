mod config;
mod device;
mod errors;
mod mqtt;
mod sensor;

use clap::Parser;
use config::Config;
use device::{LogIndicator, Producer};
use errors::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use sensor::{Sensor, SimulatedSensor};
use std::time::{Duration, Instant};
use telemetry_protocol::FixedBackoff;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = Config::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(config).await {
        error!("Producer failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    let thresholds = config.validate()?;

    info!("Starting telemetry producer for {}", config.vin);
    info!(
        "Broker: {}:{}, telemetry topic: {}, mode topic: {}",
        config.mqtt_broker, config.mqtt_port, config.telemetry_topic, config.mode_topic
    );

    let client_id = format!("producer-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(client_id, &config.mqtt_broker, config.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, eventloop) = AsyncClient::new(mqtt_options, 100);
    let (mode_tx, mut mode_rx) = mpsc::channel(16);

    tokio::spawn(mqtt::run_eventloop(
        eventloop,
        client.clone(),
        config.mode_topic.clone(),
        mode_tx,
        FixedBackoff::new(config.reconnect_interval()),
    ));

    let mut producer = Producer::new(
        config.vin.clone(),
        config.secret(),
        thresholds,
        config.start_mileage,
        LogIndicator,
    );
    let mut sensor = SimulatedSensor::new(
        StdRng::from_entropy(),
        config.start_temperature,
        config.start_mileage,
        thresholds.critical(),
    );
    let started = Instant::now();

    loop {
        let deadline = producer.next_sample_at(Instant::now());

        tokio::select! {
            Some(mode) = mode_rx.recv() => {
                producer.apply_override(mode);
            }
            _ = tokio::time::sleep_until(deadline.into()) => {
                let now = Instant::now();
                if !producer.state().is_due(now) {
                    continue;
                }

                let timestamp_ms = now.duration_since(started).as_millis() as u64;
                let out = producer.sample(sensor.read(), now, timestamp_ms);

                if let Err(e) = client
                    .publish(&config.telemetry_topic, QoS::AtMostOnce, false, out.packet.encode())
                    .await
                {
                    warn!("Failed to publish telemetry: {}", e);
                }

                if let Some(transition) = out.transition {
                    if let Err(e) = client
                        .publish(&config.mode_topic, QoS::AtMostOnce, false, transition.to.as_str())
                        .await
                    {
                        warn!("Failed to publish mode change: {}", e);
                    }
                }
            }
        }
    }
}
