//! Error types for stash-state

use thiserror::Error;

/// Errors that can occur in the stash persistence layer
#[derive(Error, Debug)]
pub enum StateError {
    /// Fingerprint is not a 64-char hex SHA-256 digest
    #[error("invalid fingerprint: {fingerprint}")]
    InvalidFingerprint { fingerprint: String },

    /// Target identifier is empty or contains characters unsafe for storage keys
    #[error("invalid target id: {0:?}")]
    InvalidTarget(String),

    /// Stored document was written by an incompatible format version
    #[error("unsupported stash document version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Backend failure (injected by fakes, or a wrapped backend error)
    #[error("stash backend failure: {0}")]
    Backend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}
