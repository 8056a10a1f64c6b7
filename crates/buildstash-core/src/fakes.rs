//! Scripted providers and engines for tests and demos.
//!
//! `SequenceProvider` hands out a scripted list of values (or failures) and
//! counts fetches, so tests can assert that a stash fetched exactly once per
//! fingerprint transition. The engines cover the failure and leak paths the
//! coordinator must handle.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use stash_state::SensitiveString;

use crate::engine::{BuildEngine, BuildInvocation, BuildResult, EngineError};
use crate::provider::{CredentialProvider, ProviderError};

// ---------------------------------------------------------------------------
// SequenceProvider
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Step {
    Value(String),
    Failure(String),
}

/// Provider returning scripted values in order.
///
/// Fails with `Unavailable` once the script is exhausted.
#[derive(Debug, Default)]
pub struct SequenceProvider {
    script: Mutex<VecDeque<Step>>,
    fetches: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl SequenceProvider {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(values.into_iter().map(|v| Step::Value(v.into())).collect()),
            fetches: AtomicUsize::new(0),
            delay: Mutex::new(None),
        }
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(Some(delay));
        self
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn push_value(&self, value: impl Into<String>) {
        self.script.lock().unwrap().push_back(Step::Value(value.into()));
    }

    pub fn push_failure(&self, reason: impl Into<String>) {
        self.script.lock().unwrap().push_back(Step::Failure(reason.into()));
    }

    /// Number of fetches started, including failed and abandoned ones.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for SequenceProvider {
    fn name(&self) -> &str {
        "sequence"
    }

    async fn fetch(&self) -> Result<SensitiveString, ProviderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Value(v)) => Ok(SensitiveString::new(v)),
            Some(Step::Failure(reason)) => Err(ProviderError::Unavailable(reason)),
            None => Err(ProviderError::Unavailable("script exhausted".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// FailingEngine
// ---------------------------------------------------------------------------

/// Engine that always fails. With `leak_secrets`, the error message carries
/// the raw value of every sensitive argument.
#[derive(Debug)]
pub struct FailingEngine {
    message: String,
    leak_secrets: bool,
    attempts: AtomicUsize,
}

impl FailingEngine {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            leak_secrets: false,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn leaking(mut self) -> Self {
        self.leak_secrets = true;
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildEngine for FailingEngine {
    fn name(&self) -> &str {
        "failing"
    }

    async fn build(&self, invocation: &BuildInvocation) -> Result<BuildResult, EngineError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut message = self.message.clone();
        if self.leak_secrets {
            for secret in invocation.sensitive_values() {
                message.push_str(" token=");
                message.push_str(secret.expose_secret());
            }
        }
        Err(EngineError::Failed(message))
    }
}

// ---------------------------------------------------------------------------
// LeakyEngine
// ---------------------------------------------------------------------------

/// Engine that succeeds but echoes raw argument values back in its result.
#[derive(Debug, Default)]
pub struct LeakyEngine;

#[async_trait]
impl BuildEngine for LeakyEngine {
    fn name(&self) -> &str {
        "leaky"
    }

    async fn build(&self, invocation: &BuildInvocation) -> Result<BuildResult, EngineError> {
        let build_args: BTreeMap<String, String> = invocation
            .args
            .iter()
            .map(|(k, v)| (k.clone(), v.expose().to_string()))
            .collect();
        let command = build_args
            .iter()
            .map(|(k, v)| format!("--build-arg {}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");

        let mut metadata = BTreeMap::new();
        metadata.insert("command".to_string(), command);

        Ok(BuildResult {
            artifact_ref: "sha256:leaky".to_string(),
            build_args,
            metadata,
        })
    }
}
