//! Stash-State: persistence for buildstash staged secrets
//!
//! This crate owns the data that outlives a single build evaluation: the
//! fingerprint a secret was staged under, the secret itself, and the store
//! that keeps them across process restarts.
//!
//! ## Key Components
//!
//! - `Fingerprint`: digest of a build's non-secret inputs
//! - `SensitiveString`: credential wrapper that never prints its value
//! - `StashRecord`: one staged secret per target
//! - `StashStore`: async persistence trait, with `FsStashStore` for disk
//!   and `fakes::MemoryStashStore` for tests

mod error;
pub mod fakes;
mod fs_store;
pub mod sensitive;
pub mod storage_traits;

pub use error::StateError;
pub use fs_store::{FsStashStore, DOCUMENT_VERSION};
pub use sensitive::{SensitiveString, REDACTED};
pub use storage_traits::{
    Fingerprint, StashRecord, StashStore, StorageResult, TargetId,
};

/// Result type for stash-state operations
pub type Result<T> = std::result::Result<T, StateError>;
