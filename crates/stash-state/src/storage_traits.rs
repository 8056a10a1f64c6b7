//! Storage trait definitions for buildstash
//!
//! - `Fingerprint`: digest of a build's non-secret inputs
//! - `TargetId`: identity of a build target owning one stash
//! - `StashRecord`: the staged secret and the fingerprint it was staged under
//! - `StashStore`: async persistence for stash records, keyed by target
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StateError;
use crate::sensitive::SensitiveString;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StateError>;

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Build fingerprint (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the SHA-256 fingerprint of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = StateError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StateError::InvalidFingerprint { fingerprint: s });
        }
        Ok(Fingerprint(s.to_ascii_lowercase()))
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TargetId
// ---------------------------------------------------------------------------

/// Identity of a build target. Each target owns exactly one stash.
///
/// Restricted to `[A-Za-z0-9._-]` so it can double as a storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetId(String);

impl TargetId {
    pub fn new(name: impl Into<String>) -> StorageResult<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= 128
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StateError::InvalidTarget(name));
        }
        Ok(TargetId(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TargetId {
    type Error = StateError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        TargetId::new(s)
    }
}

impl From<TargetId> for String {
    fn from(id: TargetId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// StashRecord
// ---------------------------------------------------------------------------

/// A staged secret.
///
/// Records are immutable: a fingerprint change produces a whole new record
/// with `generation + 1`, never an in-place edit of the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashRecord {
    /// The staged credential. Serializes as `[REDACTED]`.
    pub secret: SensitiveString,
    /// Fingerprint of the build inputs the secret was staged under
    pub staged_under: Fingerprint,
    /// 0 on first staging, incremented on every replacement
    pub generation: u64,
    /// When the secret was fetched
    pub staged_at: DateTime<Utc>,
}

impl StashRecord {
    /// First record for a target.
    pub fn initial(secret: SensitiveString, staged_under: Fingerprint) -> Self {
        Self {
            secret,
            staged_under,
            generation: 0,
            staged_at: Utc::now(),
        }
    }

    /// Successor record staged under a new fingerprint.
    pub fn successor(&self, secret: SensitiveString, staged_under: Fingerprint) -> Self {
        Self {
            secret,
            staged_under,
            generation: self.generation + 1,
            staged_at: Utc::now(),
        }
    }

    /// Whether this record is still valid for `fingerprint`.
    pub fn is_staged_under(&self, fingerprint: &Fingerprint) -> bool {
        &self.staged_under == fingerprint
    }
}

// ---------------------------------------------------------------------------
// StashStore
// ---------------------------------------------------------------------------

/// Persistent storage for stash records, one record per target.
///
/// Guarantees:
/// - `save` replaces the whole record atomically; a failed `save` leaves the
///   previous record readable.
/// - `load` returns exactly the last successfully saved record, including the
///   raw secret value.
#[async_trait]
pub trait StashStore: Send + Sync {
    /// Load the record for `target`, if any.
    async fn load(&self, target: &TargetId) -> StorageResult<Option<StashRecord>>;

    /// Persist `record` as the current record for `target`.
    async fn save(&self, target: &TargetId, record: &StashRecord) -> StorageResult<()>;

    /// Remove the record for `target`. No-op if absent.
    async fn remove(&self, target: &TargetId) -> StorageResult<()>;

    /// List targets that currently have a record, sorted.
    async fn targets(&self) -> StorageResult<Vec<TargetId>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_from_bytes_is_hex() {
        let fp = Fingerprint::from_bytes(b"config");
        assert_eq!(fp.as_str().len(), 64);
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn fingerprint_try_from_normalizes_case() {
        let upper = Fingerprint::from_bytes(b"x").as_str().to_ascii_uppercase();
        let fp = Fingerprint::try_from(upper).unwrap();
        assert_eq!(fp, Fingerprint::from_bytes(b"x"));
    }

    #[test]
    fn fingerprint_rejects_garbage() {
        assert!(Fingerprint::try_from("abcd".to_string()).is_err());
        assert!(Fingerprint::try_from("z".repeat(64)).is_err());
    }

    #[test]
    fn fingerprint_deserialize_validates() {
        let err = serde_json::from_str::<Fingerprint>("\"nope\"");
        assert!(err.is_err());
    }

    #[test]
    fn target_id_validation() {
        assert!(TargetId::new("app-image").is_ok());
        assert!(TargetId::new("app_image.v2").is_ok());
        assert!(TargetId::new("").is_err());
        assert!(TargetId::new("../escape").is_err());
        assert!(TargetId::new(".hidden").is_err());
        assert!(TargetId::new("has space").is_err());
    }

    #[test]
    fn successor_bumps_generation() {
        let first = StashRecord::initial("tok-1".into(), Fingerprint::from_bytes(b"a"));
        let next = first.successor("tok-2".into(), Fingerprint::from_bytes(b"b"));
        assert_eq!(first.generation, 0);
        assert_eq!(next.generation, 1);
        assert!(next.is_staged_under(&Fingerprint::from_bytes(b"b")));
        assert!(!next.is_staged_under(&Fingerprint::from_bytes(b"a")));
    }

    #[test]
    fn record_serialization_redacts_secret() {
        let record = StashRecord::initial("tok-1".into(), Fingerprint::from_bytes(b"a"));
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("tok-1"));
        assert!(json.contains("[REDACTED]"));
    }
}
