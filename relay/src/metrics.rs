use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_messages_total",
        "Total telemetry messages received from MQTT"
    ))
    .unwrap();
    pub static ref PARSE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_parse_failures_total",
        "Total telemetry messages that could not be parsed or stored"
    ))
    .unwrap();
    pub static ref VERIFICATIONS_REQUESTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_verifications_requested_total",
        "Total packets handed to the verifier link"
    ))
    .unwrap();
    pub static ref VERIFIED_VALID_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_verified_valid_total",
        "Total packets the verifier accepted"
    ))
    .unwrap();
    pub static ref VERIFIED_INVALID_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_verified_invalid_total",
        "Total packets the verifier rejected"
    ))
    .unwrap();
    pub static ref VERIFICATION_SKIPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_verification_skipped_total",
        "Total packets stored without verification"
    ))
    .unwrap();
    pub static ref PENDING_DROPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_pending_dropped_total",
        "Total packets dropped from a full verification queue"
    ))
    .unwrap();
    pub static ref SINK_STORED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_sink_stored_total",
        "Total verified packets written to the sink"
    ))
    .unwrap();
    pub static ref SINK_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_sink_failures_total",
        "Total verified packets the sink failed to store"
    ))
    .unwrap();
    pub static ref MODE_CHANGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_mode_changes_total",
        "Total derived mode changes queued for publishing"
    ))
    .unwrap();
    pub static ref HISTORY_SIZE: Gauge = Gauge::with_opts(Opts::new(
        "relay_history_size",
        "Records currently held in history"
    ))
    .unwrap();
    pub static ref VERIFIER_LINK_UP: Gauge = Gauge::with_opts(Opts::new(
        "relay_verifier_link_up",
        "1 when the verifier link is established"
    ))
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(PARSE_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(VERIFICATIONS_REQUESTED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(VERIFIED_VALID_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(VERIFIED_INVALID_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(VERIFICATION_SKIPPED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(PENDING_DROPPED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SINK_STORED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SINK_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(MODE_CHANGES_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(HISTORY_SIZE.clone())).unwrap();
    REGISTRY.register(Box::new(VERIFIER_LINK_UP.clone())).unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
