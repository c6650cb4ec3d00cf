use thiserror::Error;

use crate::night::Night;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Undefined night = '{0}'")]
    UnknownNight(Night),

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Unknown marker: {0}")]
    UnknownMarker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to persist status document: {0}")]
    Persist(#[from] tempfile::PersistError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
