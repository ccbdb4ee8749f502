use crate::errors::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_WARNING_THRESHOLD: f64 = 30.0;
pub const DEFAULT_CRITICAL_THRESHOLD: f64 = 40.0;

/// Operating mode, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperatingMode {
    Normal,
    Warning,
    Critical,
}

/// Colour of the status indicator bound to a mode or verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorColor {
    Green,
    Yellow,
    Red,
}

/// What a mode means for the device: how often to sample and what to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeProfile {
    pub mode: OperatingMode,
    pub sampling_interval: Duration,
    pub indicator: IndicatorColor,
}

const PROFILES: [ModeProfile; 3] = [
    ModeProfile {
        mode: OperatingMode::Normal,
        sampling_interval: Duration::from_millis(5000),
        indicator: IndicatorColor::Green,
    },
    ModeProfile {
        mode: OperatingMode::Warning,
        sampling_interval: Duration::from_millis(2000),
        indicator: IndicatorColor::Yellow,
    },
    ModeProfile {
        mode: OperatingMode::Critical,
        sampling_interval: Duration::from_millis(1000),
        indicator: IndicatorColor::Red,
    },
];

impl OperatingMode {
    pub const ALL: [OperatingMode; 3] = [
        OperatingMode::Normal,
        OperatingMode::Warning,
        OperatingMode::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperatingMode::Normal => "NORMAL",
            OperatingMode::Warning => "WARNING",
            OperatingMode::Critical => "CRITICAL",
        }
    }

    pub fn profile(self) -> &'static ModeProfile {
        &PROFILES[self as usize]
    }

    pub fn sampling_interval(self) -> Duration {
        self.profile().sampling_interval
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "NORMAL" => Ok(OperatingMode::Normal),
            "WARNING" => Ok(OperatingMode::Warning),
            "CRITICAL" => Ok(OperatingMode::Critical),
            other => Err(ParseError::UnknownMode(other.to_string())),
        }
    }
}

/// Two ordered temperature thresholds splitting the three modes.
///
/// `temp < warning` is Normal, `warning <= temp < critical` is Warning and
/// anything else is Critical. There is no hysteresis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    warning: f64,
    critical: f64,
}

impl Thresholds {
    pub fn new(warning: f64, critical: f64) -> Result<Self, ParseError> {
        if !warning.is_finite() || !critical.is_finite() || warning >= critical {
            return Err(ParseError::InvalidThresholds { warning, critical });
        }
        Ok(Self { warning, critical })
    }

    pub fn warning(&self) -> f64 {
        self.warning
    }

    pub fn critical(&self) -> f64 {
        self.critical
    }

    pub fn classify(&self, temperature: f64) -> OperatingMode {
        if temperature < self.warning {
            OperatingMode::Normal
        } else if temperature < self.critical {
            OperatingMode::Warning
        } else {
            OperatingMode::Critical
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning: DEFAULT_WARNING_THRESHOLD,
            critical: DEFAULT_CRITICAL_THRESHOLD,
        }
    }
}
