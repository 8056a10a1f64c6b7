//! Two-state stash machine.
//!
//! The replace-vs-reuse decision is a pure function of the staged record and
//! the incoming fingerprint. Nothing here performs I/O.

use serde::{Deserialize, Serialize};
use stash_state::{Fingerprint, SensitiveString, StashRecord};

/// What a stash currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StashState {
    /// Nothing staged yet.
    Empty,
    /// A record staged under some fingerprint.
    Stable(StashRecord),
}

/// Outcome of comparing the staged record with an incoming fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No record exists: fetch and create generation 0.
    Initial,
    /// Fingerprints match: hand out the staged secret untouched.
    Reuse,
    /// Fingerprints differ: fetch and replace.
    NeedsReplace {
        staged_under: Fingerprint,
        generation: u64,
    },
}

impl Decision {
    pub fn needs_fetch(&self) -> bool {
        !matches!(self, Decision::Reuse)
    }
}

/// How an evaluation changed the stash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Created,
    Reused,
    Replaced,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Transition::Created => "created",
            Transition::Reused => "reused",
            Transition::Replaced => "replaced",
        };
        f.write_str(s)
    }
}

impl StashState {
    pub fn from_record(record: Option<StashRecord>) -> Self {
        match record {
            Some(r) => StashState::Stable(r),
            None => StashState::Empty,
        }
    }

    pub fn record(&self) -> Option<&StashRecord> {
        match self {
            StashState::Empty => None,
            StashState::Stable(r) => Some(r),
        }
    }

    pub fn decide(&self, incoming: &Fingerprint) -> Decision {
        match self {
            StashState::Empty => Decision::Initial,
            StashState::Stable(r) if r.is_staged_under(incoming) => Decision::Reuse,
            StashState::Stable(r) => Decision::NeedsReplace {
                staged_under: r.staged_under.clone(),
                generation: r.generation,
            },
        }
    }

    /// Build the record that would replace the current one. Does not mutate.
    pub fn next_record(&self, secret: SensitiveString, staged_under: Fingerprint) -> StashRecord {
        match self {
            StashState::Empty => StashRecord::initial(secret, staged_under),
            StashState::Stable(r) => r.successor(secret, staged_under),
        }
    }

    pub fn transition_for(&self, decision: &Decision) -> Transition {
        match decision {
            Decision::Initial => Transition::Created,
            Decision::Reuse => Transition::Reused,
            Decision::NeedsReplace { .. } => Transition::Replaced,
        }
    }
}
