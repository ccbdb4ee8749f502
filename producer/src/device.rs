use crate::sensor::{self, SensorReading, FALLBACK_TEMPERATURE};
use std::time::{Duration, Instant};
use telemetry_protocol::{packet, ModeProfile, OperatingMode, SignedPacket, TelemetryPacket, Thresholds};
use tracing::{debug, info, warn};

/// Status light driven on every mode or override change.
pub trait Indicator {
    fn show(&mut self, profile: &ModeProfile);
}

/// Indicator that only logs; the LEDs are driven elsewhere.
pub struct LogIndicator;

impl Indicator for LogIndicator {
    fn show(&mut self, profile: &ModeProfile) {
        info!(mode = %profile.mode, indicator = ?profile.indicator, "Indicator updated");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTransition {
    pub from: OperatingMode,
    pub to: OperatingMode,
}

/// Sampling state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerState {
    pub mode: OperatingMode,
    pub sampling_interval: Duration,
    pub last_sample: Option<Instant>,
}

impl Default for ProducerState {
    fn default() -> Self {
        Self {
            mode: OperatingMode::Normal,
            sampling_interval: OperatingMode::Normal.sampling_interval(),
            last_sample: None,
        }
    }
}

impl ProducerState {
    /// The first sample is due immediately.
    pub fn next_sample_at(&self, now: Instant) -> Instant {
        match self.last_sample {
            Some(last) => last + self.sampling_interval,
            None => now,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_sample_at(now) <= now
    }

    pub fn on_sample(self, mode: OperatingMode, at: Instant) -> (Self, Option<ModeTransition>) {
        let transition = (mode != self.mode).then_some(ModeTransition {
            from: self.mode,
            to: mode,
        });
        let next = Self {
            mode,
            sampling_interval: mode.sampling_interval(),
            last_sample: Some(at),
        };
        (next, transition)
    }

    /// An override only changes the interval. The next sample reclassifies
    /// and reasserts the local interval.
    pub fn on_override(self, mode: OperatingMode) -> Self {
        Self {
            sampling_interval: mode.sampling_interval(),
            ..self
        }
    }
}

#[derive(Debug, Clone)]
pub struct TickOutput {
    pub packet: SignedPacket,
    pub transition: Option<ModeTransition>,
}

pub struct Producer<I: Indicator> {
    vin: String,
    secret: String,
    thresholds: Thresholds,
    state: ProducerState,
    mileage: u64,
    indicator: I,
}

impl<I: Indicator> Producer<I> {
    pub fn new(
        vin: impl Into<String>,
        secret: impl Into<String>,
        thresholds: Thresholds,
        start_mileage: u64,
        mut indicator: I,
    ) -> Self {
        let state = ProducerState::default();
        indicator.show(state.mode.profile());
        Self {
            vin: vin.into(),
            secret: secret.into(),
            thresholds,
            state,
            mileage: start_mileage,
            indicator,
        }
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    pub fn next_sample_at(&self, now: Instant) -> Instant {
        self.state.next_sample_at(now)
    }

    /// Classifies, signs and returns one packet for `reading`.
    pub fn sample(&mut self, reading: SensorReading, now: Instant, timestamp_ms: u64) -> TickOutput {
        let temperature = if sensor::is_sane_temperature(reading.temperature) {
            packet::wire_temperature(reading.temperature)
        } else {
            warn!(
                "Sensor reading {} out of range, using fallback {}",
                reading.temperature, FALLBACK_TEMPERATURE
            );
            FALLBACK_TEMPERATURE
        };

        if reading.odometer < self.mileage {
            warn!(
                "Odometer went backwards ({} < {}), keeping last value",
                reading.odometer, self.mileage
            );
        } else {
            self.mileage = reading.odometer;
        }

        let mode = self.thresholds.classify(temperature);
        let (state, transition) = self.state.on_sample(mode, now);
        self.state = state;

        if let Some(t) = transition {
            info!("Mode changed {} -> {}, sampling every {:?}", t.from, t.to, state.sampling_interval);
            self.indicator.show(t.to.profile());
        }

        let packet = SignedPacket::sign(
            TelemetryPacket {
                vin: self.vin.clone(),
                temperature,
                mileage: self.mileage,
                state: mode,
                dtc: reading.dtc,
                timestamp: timestamp_ms,
            },
            &self.secret,
        );
        debug!("Signed packet {}", packet);

        TickOutput { packet, transition }
    }

    /// Returns false when the override changes nothing, which is also how
    /// the echo of our own transition on the mode topic arrives.
    pub fn apply_override(&mut self, mode: OperatingMode) -> bool {
        let next = self.state.on_override(mode);
        if next == self.state {
            debug!("Mode override {} already in effect", mode);
            return false;
        }
        self.state = next;
        info!(
            "Mode override {}, sampling every {:?} until next classification",
            mode, self.state.sampling_interval
        );
        self.indicator.show(mode.profile());
        true
    }
}
