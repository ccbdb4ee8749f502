use crate::errors::Result;
use clap::Parser;
use std::time::Duration;
use telemetry_protocol::{packet, DEFAULT_VIN};

/// Verifies forwarded telemetry packets over a line-framed link.
#[derive(Debug, Clone, Parser)]
#[command(name = "verifier", version)]
pub struct Config {
    #[arg(long, env = "VERIFIER_LISTEN", default_value = "0.0.0.0:7878")]
    pub listen_addr: String,

    #[arg(long, env = "EXPECTED_VIN", default_value = DEFAULT_VIN)]
    pub expected_vin: String,

    /// Keying material for the packet tag. Defaults to the expected VIN.
    #[arg(long, env = "SHARED_SECRET")]
    pub shared_secret: Option<String>,

    /// How long a verdict stays on the display.
    #[arg(long, env = "DISPLAY_DWELL_MS", default_value_t = 3000)]
    pub dwell_ms: u64,

    #[arg(long, env = "RETRY_MS", default_value_t = 5000)]
    pub retry_ms: u64,
}

impl Config {
    pub fn secret(&self) -> &str {
        self.shared_secret.as_deref().unwrap_or(&self.expected_vin)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_ms)
    }

    pub fn validate(&self) -> Result<()> {
        Ok(packet::validate_identity(&self.expected_vin)?)
    }
}
