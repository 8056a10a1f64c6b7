//! Domain models for buildstash.
//!
//! - `BuildConfig`: declarative, secret-free build inputs
//! - `FingerprintComputer`: canonical digest of a `BuildConfig`
//! - `StashError`: error taxonomy shared by every layer above storage

pub mod build_config;
pub mod digest;
pub mod error;

pub use build_config::{BuildArgs, BuildConfig, ExportTarget, FingerprintComputer, Locator};
pub use error::{Result, StashError};
