use thiserror::Error;

#[derive(Debug, Error)]
pub enum DStarError {
    #[error("Malformed buffer descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("Unsupported sample size: {0} bytes")]
    UnsupportedSampleSize(usize),

    #[error("Invalid input size")]
    InvalidInputSize,

    #[error("Insufficient data")]
    InsufficientData,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("FEC error: {0}")]
    FecError(String),

    #[error("Vocoder transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker thread error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, DStarError>;
