use crate::errors::ParseError;
use crate::mode::OperatingMode;
use crate::signing;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const FIELD_DELIMITER: char = '|';
pub const KEY_SEPARATOR: char = ':';
pub const SIGNATURE_DELIMITER: &str = "|SIG:";

pub const KEY_VIN: &str = "VIN";
pub const KEY_TEMP: &str = "TEMP";
pub const KEY_MILEAGE: &str = "MILEAGE";
pub const KEY_STATE: &str = "STATE";
pub const KEY_DTC: &str = "DTC";
pub const KEY_TIMESTAMP: &str = "TIMESTAMP";

/// Rounds a temperature to the two decimals it has on the wire. Classify the
/// rounded value, or a receiver re-deriving the mode from `TEMP` may
/// disagree with `STATE` near a threshold.
pub fn wire_temperature(temperature: f64) -> f64 {
    (temperature * 100.0).round() / 100.0
}

/// One sampling tick of vehicle telemetry, before signing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPacket {
    pub vin: String,
    pub temperature: f64,
    pub mileage: u64,
    pub state: OperatingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtc: Option<String>,
    pub timestamp: u64,
}

impl TelemetryPacket {
    /// Canonical serialization: fixed field order, temperature at two
    /// decimals, `DTC` only when present.
    pub fn canonical(&self) -> String {
        let mut out = format!(
            "{KEY_VIN}:{}|{KEY_TEMP}:{:.2}|{KEY_MILEAGE}:{}|{KEY_STATE}:{}|",
            self.vin, self.temperature, self.mileage, self.state
        );
        if let Some(dtc) = &self.dtc {
            out.push_str(KEY_DTC);
            out.push(KEY_SEPARATOR);
            out.push_str(dtc);
            out.push(FIELD_DELIMITER);
        }
        out.push_str(KEY_TIMESTAMP);
        out.push(KEY_SEPARATOR);
        out.push_str(&self.timestamp.to_string());
        out
    }

    /// Parses an unsigned payload. Field order is not enforced, but every
    /// key must be known and appear at most once.
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        let mut vin = None;
        let mut temperature = None;
        let mut mileage = None;
        let mut state = None;
        let mut dtc = None;
        let mut timestamp = None;

        for (key, value) in fields(payload) {
            let key = key?;
            match key {
                KEY_VIN => set_once(&mut vin, key, value.to_string())?,
                KEY_TEMP => {
                    let temp: f64 = parse_value(KEY_TEMP, value)?;
                    if !temp.is_finite() {
                        return Err(invalid(KEY_TEMP, value));
                    }
                    set_once(&mut temperature, key, temp)?
                }
                KEY_MILEAGE => set_once(&mut mileage, key, parse_value(KEY_MILEAGE, value)?)?,
                KEY_STATE => set_once(&mut state, key, value.parse::<OperatingMode>()?)?,
                KEY_DTC => set_once(&mut dtc, key, value.to_string())?,
                KEY_TIMESTAMP => {
                    set_once(&mut timestamp, key, parse_value(KEY_TIMESTAMP, value)?)?
                }
                other => return Err(ParseError::UnknownField(other.to_string())),
            }
        }

        let vin = vin.ok_or(ParseError::MissingField(KEY_VIN))?;
        if vin.is_empty() {
            return Err(ParseError::MissingField(KEY_VIN));
        }

        Ok(Self {
            vin,
            temperature: temperature.ok_or(ParseError::MissingField(KEY_TEMP))?,
            mileage: mileage.ok_or(ParseError::MissingField(KEY_MILEAGE))?,
            state: state.ok_or(ParseError::MissingField(KEY_STATE))?,
            dtc,
            timestamp: timestamp.ok_or(ParseError::MissingField(KEY_TIMESTAMP))?,
        })
    }
}

/// A packet together with its keyed digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedPacket {
    pub packet: TelemetryPacket,
    pub tag: String,
}

impl SignedPacket {
    pub fn sign(packet: TelemetryPacket, secret: &str) -> Self {
        let tag = signing::compute_tag(&packet.canonical(), secret);
        Self { packet, tag }
    }

    pub fn encode(&self) -> String {
        format!("{}{SIGNATURE_DELIMITER}{}", self.packet.canonical(), self.tag)
    }

    /// Parses a full signed packet. The tag is not checked here.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let (payload, tag) = split_signature(raw).ok_or(ParseError::MissingSignature)?;
        Ok(Self {
            packet: TelemetryPacket::parse(payload)?,
            tag: tag.to_string(),
        })
    }
}

impl fmt::Display for SignedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Splits `raw` into the signed payload and the hex tag.
pub fn split_signature(raw: &str) -> Option<(&str, &str)> {
    raw.split_once(SIGNATURE_DELIMITER)
}

/// Looks up a single field value in an unsigned payload.
pub fn field<'a>(payload: &'a str, wanted: &str) -> Option<&'a str> {
    payload
        .split(FIELD_DELIMITER)
        .filter_map(|f| f.split_once(KEY_SEPARATOR))
        .find(|(key, _)| *key == wanted)
        .map(|(_, value)| value)
}

/// An identity must be non-empty and must not contain wire delimiters.
pub fn validate_identity(identity: &str) -> Result<(), ParseError> {
    if identity.is_empty()
        || identity.contains(FIELD_DELIMITER)
        || identity.contains(KEY_SEPARATOR)
        || identity.contains(['\r', '\n'])
    {
        return Err(ParseError::InvalidIdentity(identity.to_string()));
    }
    Ok(())
}

fn fields(payload: &str) -> impl Iterator<Item = (Result<&str, ParseError>, &str)> {
    payload.split(FIELD_DELIMITER).map(|f| match f.split_once(KEY_SEPARATOR) {
        Some((key, value)) => (Ok(key), value),
        None => (Err(ParseError::MalformedField(f.to_string())), ""),
    })
}

fn set_once<T>(slot: &mut Option<T>, key: &str, value: T) -> Result<(), ParseError> {
    if slot.is_some() {
        return Err(ParseError::DuplicateField(key.to_string()));
    }
    *slot = Some(value);
    Ok(())
}

fn parse_value<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ParseError> {
    value.parse().map_err(|_| invalid(field, value))
}

fn invalid(field: &'static str, value: &str) -> ParseError {
    ParseError::InvalidValue {
        field,
        value: value.to_string(),
    }
}
