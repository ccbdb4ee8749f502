use chrono::{DateTime, Utc};
use serde::Serialize;
use telemetry_protocol::{OperatingMode, SignedPacket};

/// A parsed telemetry packet as stored in the relay history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub vin: String,
    pub temperature: f64,
    pub mileage: u64,
    pub state: OperatingMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtc: Option<String>,
    pub timestamp: u64,
    pub signature: String,
    pub received_at: DateTime<Utc>,
}

impl TelemetryRecord {
    pub fn from_signed(signed: SignedPacket, received_at: DateTime<Utc>) -> Self {
        let SignedPacket { packet, tag } = signed;
        Self {
            vin: packet.vin,
            temperature: packet.temperature,
            mileage: packet.mileage,
            state: packet.state,
            dtc: packet.dtc,
            timestamp: packet.timestamp,
            signature: tag,
            received_at,
        }
    }
}

/// Temperature statistics over the current history. All zero when empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateStatistics {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// A raw packet on its way to the verifier, and to the sink once verified.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedPacket {
    pub raw: String,
    pub received_at: DateTime<Utc>,
}

/// A packet handed to the verifier link. `generation` identifies the link
/// connection it was dispatched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyRequest {
    pub generation: u64,
    pub raw: String,
}

/// REST API response wrapper
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub data: Vec<TelemetryRecord>,
    pub total: usize,
    pub capacity: usize,
}

#[derive(Debug, Serialize)]
pub struct VerifierStatus {
    pub connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_protocol::{TelemetryPacket, Thresholds};

    #[test]
    fn test_record_json_shape() {
        let signed = SignedPacket::sign(
            TelemetryPacket {
                vin: "VIN1".to_string(),
                temperature: 41.5,
                mileage: 1200,
                state: Thresholds::default().classify(41.5),
                dtc: None,
                timestamp: 99,
            },
            "VIN1",
        );
        let record = TelemetryRecord::from_signed(signed, Utc::now());

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["state"], "CRITICAL");
        assert_eq!(json["mileage"], 1200);
        assert_eq!(json["signature"].as_str().unwrap().len(), 64);
        assert!(json.get("dtc").is_none());
    }
}
