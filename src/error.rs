use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscribeError {
    /// Malformed or empty arguments, rejected before any analysis runs.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The pitch or onset estimator failed internally.
    #[error("Estimation failed: {0}")]
    EstimationFailure(String),

    /// Writing or reading the MIDI container failed.
    #[error("Serialization failed: {0}")]
    SerializationFailure(String),

    #[error("File {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to decode audio: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, TranscribeError>;
