use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid priority: {0}")]
    InvalidPriority(u8),

    #[error("Unknown frame type: {0}")]
    UnknownFrameType(u8),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid grammar pattern: {0}")]
    InvalidGrammar(String),

    // Circuit list errors
    #[error("Invalid circuit record: {0}")]
    InvalidCircuit(String),

    #[error("Duplicate circuit address: {0}")]
    DuplicateAddress(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
