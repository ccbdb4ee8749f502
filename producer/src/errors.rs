use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] telemetry_protocol::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;
