use rand::Rng;

/// Readings outside this range are treated as a sensor fault.
pub const SANE_MIN_TEMPERATURE: f64 = -55.0;
pub const SANE_MAX_TEMPERATURE: f64 = 125.0;
/// Substituted for a faulty temperature reading.
pub const FALLBACK_TEMPERATURE: f64 = 25.0;
/// DS18B20 reports this when the probe is disconnected.
const DISCONNECTED_READING: f64 = -127.0;

const OVERHEAT_DTC: &str = "P0217";
const RANDOM_DTCS: [&str; 3] = ["P0300", "P0171", "P0420"];

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub temperature: f64,
    pub odometer: u64,
    pub dtc: Option<String>,
}

/// Source of raw readings. Physical acquisition lives behind this trait.
pub trait Sensor {
    fn read(&mut self) -> SensorReading;
}

pub fn is_sane_temperature(temperature: f64) -> bool {
    temperature.is_finite() && (SANE_MIN_TEMPERATURE..=SANE_MAX_TEMPERATURE).contains(&temperature)
}

/// Random-walk engine temperature with occasional spikes and probe faults.
pub struct SimulatedSensor<R: Rng> {
    rng: R,
    temperature: f64,
    odometer: u64,
    overheat_at: f64,
}

impl<R: Rng> SimulatedSensor<R> {
    pub fn new(rng: R, start_temperature: f64, start_odometer: u64, overheat_at: f64) -> Self {
        Self {
            rng,
            temperature: start_temperature,
            odometer: start_odometer,
            overheat_at,
        }
    }
}

impl<R: Rng> Sensor for SimulatedSensor<R> {
    fn read(&mut self) -> SensorReading {
        let step = if self.rng.gen_bool(0.02) {
            self.rng.gen_range(5.0..12.0) // spike
        } else {
            self.rng.gen_range(-1.5..1.5)
        };
        self.temperature = (self.temperature + step).clamp(10.0, 55.0);
        self.odometer += self.rng.gen_range(0..=3);

        let temperature = if self.rng.gen_bool(0.01) {
            DISCONNECTED_READING
        } else {
            self.temperature
        };

        let dtc = if temperature >= self.overheat_at {
            Some(OVERHEAT_DTC.to_string())
        } else if self.rng.gen_bool(0.01) {
            Some(RANDOM_DTCS[self.rng.gen_range(0..RANDOM_DTCS.len())].to_string())
        } else {
            None
        };

        SensorReading {
            temperature,
            odometer: self.odometer,
            dtc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sane_range() {
        assert!(is_sane_temperature(25.0));
        assert!(is_sane_temperature(SANE_MIN_TEMPERATURE));
        assert!(is_sane_temperature(SANE_MAX_TEMPERATURE));
        assert!(!is_sane_temperature(DISCONNECTED_READING));
        assert!(!is_sane_temperature(f64::NAN));
        assert!(!is_sane_temperature(f64::INFINITY));
    }

    #[test]
    fn test_simulated_odometer_never_decreases() {
        let mut sensor = SimulatedSensor::new(StdRng::seed_from_u64(7), 24.0, 1000, 40.0);
        let mut last = 1000;
        for _ in 0..500 {
            let reading = sensor.read();
            assert!(reading.odometer >= last);
            last = reading.odometer;
        }
    }

    #[test]
    fn test_overheat_sets_dtc() {
        let mut sensor = SimulatedSensor::new(StdRng::seed_from_u64(1), 55.0, 0, 10.0);
        for _ in 0..50 {
            let reading = sensor.read();
            if is_sane_temperature(reading.temperature) {
                assert_eq!(reading.dtc.as_deref(), Some(OVERHEAT_DTC));
            }
        }
    }
}
