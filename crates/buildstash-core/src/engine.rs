//! Build engine seam and the argument types passed across it.
//!
//! The coordinator never builds images itself. It hands a [`BuildInvocation`]
//! to a [`BuildEngine`] exactly once per evaluation. Engines must treat
//! [`ArgValue::Sensitive`] arguments as redacted in anything they log or
//! return; the coordinator re-checks their output regardless.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stash_state::{SensitiveString, REDACTED};
use tracing::info;

use crate::domain::{BuildConfig, ExportTarget, Locator};

/// A build-argument value, plain or sensitive.
///
/// Serializes sensitive values as `[REDACTED]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    Plain(String),
    Sensitive(SensitiveString),
}

impl ArgValue {
    pub fn is_sensitive(&self) -> bool {
        matches!(self, ArgValue::Sensitive(_))
    }

    /// The value as it may be shown to humans or stored in metadata.
    pub fn redacted(&self) -> &str {
        match self {
            ArgValue::Plain(v) => v,
            ArgValue::Sensitive(_) => REDACTED,
        }
    }

    /// The value as the engine must pass it to the build. Never log this.
    pub fn expose(&self) -> &str {
        match self {
            ArgValue::Plain(v) => v,
            ArgValue::Sensitive(s) => s.expose_secret(),
        }
    }
}

/// One complete request to a build engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInvocation {
    pub context: Locator,
    pub dockerfile: Locator,
    pub args: BTreeMap<String, ArgValue>,
    pub exports: Vec<ExportTarget>,
    pub tags: Vec<String>,
    pub push: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub platforms: Vec<String>,
}

impl BuildInvocation {
    /// Invocation carrying only the config's public arguments.
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            context: config.context.clone(),
            dockerfile: config.dockerfile.clone(),
            args: config
                .build_args
                .iter()
                .map(|(k, v)| (k.to_string(), ArgValue::Plain(v.to_string())))
                .collect(),
            exports: config.exports.clone(),
            tags: config.tags.clone(),
            push: config.push,
            target: config.target.clone(),
            platforms: config.platforms.clone(),
        }
    }

    pub fn with_sensitive_arg(mut self, name: impl Into<String>, value: SensitiveString) -> Self {
        self.args.insert(name.into(), ArgValue::Sensitive(value));
        self
    }

    /// Argument echo with sensitive values masked.
    pub fn redacted_args(&self) -> BTreeMap<String, String> {
        self.args
            .iter()
            .map(|(k, v)| (k.clone(), v.redacted().to_string()))
            .collect()
    }

    /// Every sensitive value in the invocation.
    pub fn sensitive_values(&self) -> impl Iterator<Item = &SensitiveString> {
        self.args.values().filter_map(|v| match v {
            ArgValue::Sensitive(s) => Some(s),
            ArgValue::Plain(_) => None,
        })
    }
}

/// What an engine reports back.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    /// Image reference or digest of the produced artifact.
    pub artifact_ref: String,
    /// Echo of the arguments used, sensitive ones masked.
    pub build_args: BTreeMap<String, String>,
    /// Free-form engine metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Errors a build engine may report. Surfaced as `StashError::BuildFailed`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("build engine failed: {0}")]
    Failed(String),

    #[error("build engine unavailable: {0}")]
    Unavailable(String),

    #[error("build timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// A container-build executor.
#[async_trait]
pub trait BuildEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn build(&self, invocation: &BuildInvocation) -> Result<BuildResult, EngineError>;
}

/// Engine that records invocations instead of building.
///
/// The artifact reference is the SHA-256 of the redacted invocation, so it is
/// stable across credential rotation and changes with every real input.
#[derive(Debug, Default)]
pub struct DryRunEngine {
    invocations: Mutex<Vec<BuildInvocation>>,
}

impl DryRunEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn invocations(&self) -> Vec<BuildInvocation> {
        self.invocations.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn last_invocation(&self) -> Option<BuildInvocation> {
        self.invocations.lock().unwrap_or_else(|p| p.into_inner()).last().cloned()
    }
}

#[async_trait]
impl BuildEngine for DryRunEngine {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn build(&self, invocation: &BuildInvocation) -> Result<BuildResult, EngineError> {
        let redacted = serde_json::to_vec(invocation)
            .map_err(|e| EngineError::Failed(format!("cannot encode invocation: {}", e)))?;
        let artifact_ref = format!("sha256:{}", hex::encode(Sha256::digest(&redacted)));

        info!(
            engine = self.name(),
            artifact = %artifact_ref,
            args = invocation.args.len(),
            "dry-run build recorded"
        );

        let mut metadata = BTreeMap::new();
        metadata.insert("engine".to_string(), self.name().to_string());
        metadata.insert("tags".to_string(), invocation.tags.join(","));
        metadata.insert("push".to_string(), invocation.push.to_string());

        self.invocations.lock().unwrap_or_else(|p| p.into_inner()).push(invocation.clone());

        Ok(BuildResult {
            artifact_ref,
            build_args: invocation.redacted_args(),
            metadata,
        })
    }
}
