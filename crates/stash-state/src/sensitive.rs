//! Secure wrapper for credential values.
//!
//! Staged secrets travel through logs, debug output and serialized build
//! metadata. `SensitiveString` makes every one of those paths print the mask
//! instead of the value.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Marker printed in place of a sensitive value.
pub const REDACTED: &str = "[REDACTED]";

/// A string wrapper that redacts its contents in Debug, Display, and serialization.
///
/// - Debug output shows `SensitiveString([REDACTED])`
/// - Display output shows `[REDACTED]`
/// - Serialization outputs `"[REDACTED]"`, never the value
/// - Deserialization accepts real values
/// - Memory is zeroed on drop
///
/// The raw value is only reachable through [`SensitiveString::expose_secret`].
/// Stores that must persist the raw value use the [`exposed`] serde adapter
/// explicitly.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SensitiveString(String);

impl SensitiveString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Exposes the underlying value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for SensitiveString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(SensitiveString(value))
    }
}

impl fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveString({})", REDACTED)
    }
}

impl fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl PartialEq for SensitiveString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SensitiveString {}

impl From<String> for SensitiveString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SensitiveString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Serde adapter that writes the raw value. Only for at-rest stash documents.
///
/// ```rust,ignore
/// #[serde(with = "stash_state::sensitive::exposed")]
/// secret: SensitiveString,
/// ```
pub mod exposed {
    use super::SensitiveString;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &SensitiveString, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value.expose_secret())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SensitiveString, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SensitiveString::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_debug_and_display() {
        let secret = SensitiveString::new("tok-123");
        assert_eq!(format!("{:?}", secret), "SensitiveString([REDACTED])");
        assert_eq!(format!("{}", secret), "[REDACTED]");
    }

    #[test]
    fn test_serialize_never_emits_value() {
        let secret = SensitiveString::new("tok-123");
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, "\"[REDACTED]\"");
    }

    #[test]
    fn test_deserialize_accepts_value() {
        let secret: SensitiveString = serde_json::from_str("\"tok-123\"").unwrap();
        assert_eq!(secret.expose_secret(), "tok-123");
    }

    #[test]
    fn test_exposed_adapter_writes_raw_value() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Doc {
            #[serde(with = "exposed")]
            secret: SensitiveString,
        }

        let doc = Doc {
            secret: SensitiveString::new("tok-raw"),
        };
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"secret":"tok-raw"}"#);

        let back: Doc = serde_json::from_str(&json).unwrap();
        assert_eq!(back.secret.expose_secret(), "tok-raw");
    }
}
