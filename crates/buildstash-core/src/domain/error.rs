//! Error taxonomy for build evaluations.

use crate::engine::EngineError;

/// Errors produced by fingerprinting, staging and coordinated builds.
///
/// No variant is recovered from locally. A failed evaluation always leaves the
/// stash holding the last successfully staged record.
#[derive(Debug, thiserror::Error)]
pub enum StashError {
    /// Malformed build configuration. Not retried.
    #[error("invalid build config: {0}")]
    InvalidConfig(String),

    /// The credential provider failed or timed out. Safe to retry the whole evaluation.
    #[error("credential fetch failed: {reason}")]
    CredentialFetchFailed { reason: String },

    /// The build engine failed. Propagated verbatim.
    #[error("build failed: {source}")]
    BuildFailed {
        #[source]
        source: EngineError,
    },

    /// The evaluation was cancelled before any state change was published.
    #[error("evaluation cancelled")]
    Cancelled,

    /// The new record could not be persisted, so it was not published.
    #[error("stash state error: {0}")]
    StateStore(#[from] stash_state::StateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StashError {
    /// Whether retrying the whole evaluation can succeed without input changes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StashError::CredentialFetchFailed { .. } | StashError::StateStore(_)
        )
    }
}

/// Result type for buildstash operations.
pub type Result<T> = std::result::Result<T, StashError>;
