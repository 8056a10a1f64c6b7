//! Credential providers: the only source of fresh secret values.
//!
//! The stash calls [`CredentialProvider::fetch`] once per fingerprint
//! transition and never otherwise. Real providers talk to whatever issues
//! short-lived credentials; the ones here cover static wiring and demos.

use async_trait::async_trait;
use chrono::Utc;
use stash_state::SensitiveString;
use tracing::debug;

/// Errors a provider may report. All of them surface as
/// `StashError::CredentialFetchFailed`.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("credential provider unavailable: {0}")]
    Unavailable(String),

    #[error("credential request rejected: {0}")]
    Rejected(String),

    #[error("credential provider returned an empty value")]
    Empty,
}

/// Supplies a fresh secret on demand.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Display name for logging.
    fn name(&self) -> &str;

    /// Fetch a fresh credential. May block on network I/O.
    async fn fetch(&self) -> Result<SensitiveString, ProviderError>;
}

/// Returns one configured value on every fetch.
///
/// This is the "no real provider wired" case: the value usually comes from
/// process configuration at the CLI edge.
pub struct StaticProvider {
    value: SensitiveString,
}

impl StaticProvider {
    pub fn new(value: impl Into<SensitiveString>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self) -> Result<SensitiveString, ProviderError> {
        if self.value.is_empty() {
            return Err(ProviderError::Empty);
        }
        Ok(self.value.clone())
    }
}

/// Mints `<prefix>-<unix-millis>` tokens, standing in for a token service
/// whose output changes on every call.
pub struct MintingProvider {
    prefix: String,
}

impl MintingProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for MintingProvider {
    fn default() -> Self {
        Self::new("temp-token")
    }
}

#[async_trait]
impl CredentialProvider for MintingProvider {
    fn name(&self) -> &str {
        "minting"
    }

    async fn fetch(&self) -> Result<SensitiveString, ProviderError> {
        let token = format!("{}-{}", self.prefix, Utc::now().timestamp_millis());
        debug!(provider = self.name(), len = token.len(), "minted credential");
        Ok(SensitiveString::new(token))
    }
}
