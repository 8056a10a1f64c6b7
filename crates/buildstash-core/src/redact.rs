//! Literal-value redaction for text that leaves the coordinator.
//!
//! Engines are external code. Whatever they echo back (argument maps,
//! metadata, error messages) is scrubbed of every known secret before the
//! coordinator re-exposes it.

use serde::{Deserialize, Serialize};
use stash_state::{SensitiveString, REDACTED};

/// Result of applying redaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionResult {
    pub text: String,
    pub redactions_applied: usize,
}

/// Replaces literal occurrences of known secrets with `[REDACTED]`.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<SensitiveString>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secret. Empty values are ignored since they match everywhere.
    pub fn add_secret(&mut self, secret: &SensitiveString) {
        if secret.is_empty() || self.secrets.contains(secret) {
            return;
        }
        self.secrets.push(secret.clone());
        // Longest first, so a secret containing another is masked whole.
        self.secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
    }

    pub fn with_secret(mut self, secret: &SensitiveString) -> Self {
        self.add_secret(secret);
        self
    }

    pub fn redact(&self, text: &str) -> RedactionResult {
        let mut result = text.to_string();
        let mut count = 0;
        for secret in &self.secrets {
            let raw = secret.expose_secret();
            let matches = result.matches(raw).count();
            if matches > 0 {
                result = result.replace(raw, REDACTED);
                count += matches;
            }
        }
        RedactionResult {
            text: result,
            redactions_applied: count,
        }
    }

    /// Redacted text only.
    pub fn scrub(&self, text: &str) -> String {
        self.redact(text).text
    }
}
