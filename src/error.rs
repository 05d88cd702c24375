/// Errors surfaced to the caller of the transport
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("Audio backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Failed to spawn scheduler thread: {0}")]
    Thread(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SequencerError>;
