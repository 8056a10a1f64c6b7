//! Bounded credential fetch: timeout and cancellation around the one
//! suspension point of an evaluation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stash_state::SensitiveString;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::{Result, StashError};
use crate::provider::CredentialProvider;

/// Limits applied to every credential fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Maximum wall-clock time for one fetch (milliseconds).
    pub timeout_ms: u64,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl FetchPolicy {
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Fetch once from `provider` under `policy`.
///
/// Cancellation wins over a simultaneously completing fetch. Empty values
/// are rejected rather than staged.
pub(crate) async fn fetch_bounded(
    provider: &dyn CredentialProvider,
    policy: &FetchPolicy,
    cancel: Option<&CancellationToken>,
) -> Result<SensitiveString> {
    let bounded = tokio::time::timeout(policy.timeout(), provider.fetch());

    let outcome = match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    warn!(provider = provider.name(), "credential fetch cancelled");
                    return Err(StashError::Cancelled);
                }
                outcome = bounded => outcome,
            }
        }
        None => bounded.await,
    };

    match outcome {
        Err(_elapsed) => {
            warn!(
                provider = provider.name(),
                timeout_ms = policy.timeout_ms,
                "credential fetch timed out"
            );
            Err(StashError::CredentialFetchFailed {
                reason: format!(
                    "provider '{}' timed out after {}ms",
                    provider.name(),
                    policy.timeout_ms
                ),
            })
        }
        Ok(Err(e)) => {
            warn!(provider = provider.name(), error = %e, "credential fetch failed");
            Err(StashError::CredentialFetchFailed {
                reason: e.to_string(),
            })
        }
        Ok(Ok(secret)) if secret.is_empty() => Err(StashError::CredentialFetchFailed {
            reason: format!("provider '{}' returned an empty value", provider.name()),
        }),
        Ok(Ok(secret)) => Ok(secret),
    }
}
