use crate::errors::Result;
use clap::Parser;
use std::time::Duration;
use telemetry_protocol::mode::{DEFAULT_CRITICAL_THRESHOLD, DEFAULT_WARNING_THRESHOLD};
use telemetry_protocol::{packet, Thresholds, DEFAULT_MODE_TOPIC, DEFAULT_TELEMETRY_TOPIC, DEFAULT_VIN};

/// Signed vehicle telemetry producer.
#[derive(Debug, Clone, Parser)]
#[command(name = "producer", version)]
pub struct Config {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    pub mqtt_broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long, env = "TELEMETRY_TOPIC", default_value = DEFAULT_TELEMETRY_TOPIC)]
    pub telemetry_topic: String,

    #[arg(long, env = "MODE_TOPIC", default_value = DEFAULT_MODE_TOPIC)]
    pub mode_topic: String,

    #[arg(long, env = "VEHICLE_VIN", default_value = DEFAULT_VIN)]
    pub vin: String,

    /// Keying material for the packet tag. Defaults to the VIN.
    #[arg(long, env = "SHARED_SECRET")]
    pub shared_secret: Option<String>,

    #[arg(long, env = "TEMP_WARNING", default_value_t = DEFAULT_WARNING_THRESHOLD)]
    pub warning_threshold: f64,

    #[arg(long, env = "TEMP_CRITICAL", default_value_t = DEFAULT_CRITICAL_THRESHOLD)]
    pub critical_threshold: f64,

    /// Initial temperature of the simulated sensor.
    #[arg(long, env = "START_TEMPERATURE", default_value_t = 24.0)]
    pub start_temperature: f64,

    #[arg(long, env = "START_MILEAGE", default_value_t = 0)]
    pub start_mileage: u64,

    #[arg(long, env = "RECONNECT_MS", default_value_t = 5000)]
    pub reconnect_ms: u64,
}

impl Config {
    pub fn secret(&self) -> &str {
        self.shared_secret.as_deref().unwrap_or(&self.vin)
    }

    pub fn thresholds(&self) -> Result<Thresholds> {
        Ok(Thresholds::new(self.warning_threshold, self.critical_threshold)?)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }

    pub fn validate(&self) -> Result<Thresholds> {
        packet::validate_identity(&self.vin)?;
        self.thresholds()
    }
}
