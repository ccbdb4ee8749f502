use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] telemetry_protocol::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;
