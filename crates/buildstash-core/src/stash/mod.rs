//! Change-triggered secret staging.
//!
//! A [`SecretStash`] holds one credential per build target together with the
//! fingerprint it was fetched under. Identical fingerprints reuse the staged
//! value; a changed fingerprint triggers exactly one provider fetch.

mod fetch;
pub mod machine;
mod registry;
mod secret_stash;

pub use fetch::FetchPolicy;
pub use machine::{Decision, StashState, Transition};
pub use registry::StashRegistry;
pub use secret_stash::{SecretStash, StashSnapshot, StashStats, Staged};
