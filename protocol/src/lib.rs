//! Wire format, keyed digest and mode table shared by the producer, the
//! verifier and the relay.
//!
//! Every component links this crate so that canonicalization and digest
//! computation cannot drift between them.

pub mod backoff;
pub mod errors;
pub mod frame;
pub mod mode;
pub mod packet;
pub mod signing;

pub use backoff::{Backoff, ExponentialBackoff, FixedBackoff};
pub use errors::ParseError;
pub use mode::{IndicatorColor, ModeProfile, OperatingMode, Thresholds};
pub use packet::{SignedPacket, TelemetryPacket};
pub use signing::{RejectReason, Verdict, Verifier};

/// Identity of the reference test vehicle.
pub const DEFAULT_VIN: &str = "1HGCM82633A123456";
pub const DEFAULT_TELEMETRY_TOPIC: &str = "vehicle/telemetry";
pub const DEFAULT_MODE_TOPIC: &str = "vehicle/state";
