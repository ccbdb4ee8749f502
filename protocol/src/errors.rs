use thiserror::Error;

/// Errors raised while decoding wire-format text.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("missing signature delimiter")]
    MissingSignature,

    #[error("field without key/value separator: {0}")]
    MalformedField(String),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("duplicate field {0}")]
    DuplicateField(String),

    #[error("unknown field {0}")]
    UnknownField(String),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("unknown mode: {0}")]
    UnknownMode(String),

    #[error("invalid thresholds: warning={warning}, critical={critical}")]
    InvalidThresholds { warning: f64, critical: f64 },

    #[error("invalid identity: {0:?}")]
    InvalidIdentity(String),
}
