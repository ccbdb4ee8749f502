use crate::errors::Result;
use clap::Parser;
use std::num::NonZeroUsize;
use std::time::Duration;
use telemetry_protocol::mode::{DEFAULT_CRITICAL_THRESHOLD, DEFAULT_WARNING_THRESHOLD};
use telemetry_protocol::{Thresholds, DEFAULT_MODE_TOPIC, DEFAULT_TELEMETRY_TOPIC};

/// Bridges MQTT telemetry to the verifier and keeps recent history.
#[derive(Debug, Clone, Parser)]
#[command(name = "relay", version)]
pub struct Config {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    pub mqtt_broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long, env = "TELEMETRY_TOPIC", default_value = DEFAULT_TELEMETRY_TOPIC)]
    pub telemetry_topic: String,

    #[arg(long, env = "MODE_TOPIC", default_value = DEFAULT_MODE_TOPIC)]
    pub mode_topic: String,

    #[arg(long, env = "VERIFIER_ADDR", default_value = "127.0.0.1:7878")]
    pub verifier_addr: String,

    #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: String,

    #[arg(long, env = "HISTORY_CAPACITY", default_value = "100")]
    pub history_capacity: NonZeroUsize,

    /// Packets waiting behind the one being verified.
    #[arg(long, env = "PENDING_CAPACITY", default_value_t = crate::state::DEFAULT_PENDING_CAPACITY)]
    pub pending_capacity: usize,

    /// PostgreSQL sink for verified packets. Logged only when unset.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "TEMP_WARNING", default_value_t = DEFAULT_WARNING_THRESHOLD)]
    pub warning_threshold: f64,

    #[arg(long, env = "TEMP_CRITICAL", default_value_t = DEFAULT_CRITICAL_THRESHOLD)]
    pub critical_threshold: f64,

    #[arg(long, env = "RECONNECT_MS", default_value_t = 5000)]
    pub reconnect_ms: u64,

    #[arg(long, env = "CHANNEL_CAPACITY", default_value = "1024")]
    pub channel_capacity: NonZeroUsize,
}

impl Config {
    pub fn thresholds(&self) -> Result<Thresholds> {
        Ok(Thresholds::new(self.warning_threshold, self.critical_threshold)?)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["relay"]);
        assert_eq!(config.history_capacity.get(), 100);
        assert_eq!(config.pending_capacity, 16);
        assert!(config.database_url.is_none());
        assert_eq!(config.thresholds().unwrap(), Thresholds::default());
    }

    #[test]
    fn test_zero_history_capacity_rejected() {
        assert!(Config::try_parse_from(["relay", "--history-capacity", "0"]).is_err());
    }

    #[test]
    fn test_zero_channel_capacity_rejected() {
        assert!(Config::try_parse_from(["relay", "--channel-capacity", "0"]).is_err());
        let config = Config::parse_from(["relay", "--channel-capacity", "8"]);
        assert_eq!(config.channel_capacity.get(), 8);
    }
}
