//! Error types for annex

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Segment corruption: {0}")]
    CorruptSegment(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// API misuse: double finish, append after finish, re-entrant writer
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Unsupported quantization type: {0}")]
    UnsupportedQuantizationType(u8),

    /// Backend failure while building the native index for one field
    #[error("Index build failed for field '{field}': {reason}")]
    IndexBuildFailure { field: String, reason: String },

    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptSegment(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
