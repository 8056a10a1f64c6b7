//! buildstash core library
//!
//! Change-triggered secret staging for container image builds: a build's
//! declarative inputs are fingerprinted, and the short-lived credential
//! passed to the build is refreshed only when that fingerprint changes.

pub mod coordinator;
pub mod domain;
pub mod engine;
pub mod fakes;
pub mod provider;
pub mod redact;
pub mod stash;
pub mod telemetry;

pub use coordinator::{BuildCoordinator, BuildOutcome};

pub use domain::{
    BuildArgs, BuildConfig, ExportTarget, FingerprintComputer, Locator, Result, StashError,
};

pub use engine::{ArgValue, BuildEngine, BuildInvocation, BuildResult, DryRunEngine, EngineError};

pub use provider::{CredentialProvider, MintingProvider, ProviderError, StaticProvider};

pub use redact::{RedactionResult, Redactor};

pub use stash::{
    FetchPolicy, SecretStash, StashRegistry, StashSnapshot, StashStats, Staged, Transition,
};

pub use stash_state::{
    Fingerprint, FsStashStore, SensitiveString, StashRecord, StashStore, TargetId, REDACTED,
};

pub use telemetry::init_tracing;
