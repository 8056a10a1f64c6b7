use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stash_state::{Fingerprint, SensitiveString, StashStore, TargetId};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::fetch::{fetch_bounded, FetchPolicy};
use super::machine::{Decision, StashState, Transition};
use crate::domain::{Result, StashError};
use crate::provider::CredentialProvider;

/// The secret handed out by one evaluation, with how it was obtained.
#[derive(Debug, Clone)]
pub struct Staged {
    pub secret: SensitiveString,
    pub fingerprint: Fingerprint,
    pub generation: u64,
    pub transition: Transition,
}

/// Secret-free view of a staged record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StashSnapshot {
    pub target: String,
    pub fingerprint: Fingerprint,
    pub generation: u64,
    pub staged_at: DateTime<Utc>,
}

/// Point-in-time copy of a stash's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StashStats {
    pub fetch_attempts: u64,
    pub fetch_failures: u64,
    pub creations: u64,
    pub replacements: u64,
    pub reuses: u64,
    pub ignored_offers: u64,
}

#[derive(Debug, Default)]
struct Counters {
    fetch_attempts: AtomicU64,
    fetch_failures: AtomicU64,
    creations: AtomicU64,
    replacements: AtomicU64,
    reuses: AtomicU64,
    ignored_offers: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StashStats {
        StashStats {
            fetch_attempts: self.fetch_attempts.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            creations: self.creations.load(Ordering::Relaxed),
            replacements: self.replacements.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            ignored_offers: self.ignored_offers.load(Ordering::Relaxed),
        }
    }
}

struct Slot {
    hydrated: bool,
    state: StashState,
}

/// Holds one secret per build target and replaces it only when the
/// target's fingerprint changes.
///
/// Every evaluation runs under one async lock, from the fingerprint
/// comparison through the fetch to the store write, so concurrent callers
/// for the same target observe a single transition. The in-memory record is
/// swapped only after the store accepted the replacement.
pub struct SecretStash {
    target: TargetId,
    provider: Arc<dyn CredentialProvider>,
    store: Arc<dyn StashStore>,
    policy: FetchPolicy,
    slot: Mutex<Slot>,
    counters: Counters,
}

impl SecretStash {
    pub fn new(
        target: TargetId,
        provider: Arc<dyn CredentialProvider>,
        store: Arc<dyn StashStore>,
    ) -> Self {
        Self {
            target,
            provider,
            store,
            policy: FetchPolicy::default(),
            slot: Mutex::new(Slot {
                hydrated: false,
                state: StashState::Empty,
            }),
            counters: Counters::default(),
        }
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    pub fn stats(&self) -> StashStats {
        self.counters.snapshot()
    }

    /// Return the secret to use for a build with this fingerprint.
    ///
    /// Fetches from the provider only when nothing is staged or the staged
    /// fingerprint differs.
    pub async fn evaluate(&self, fingerprint: &Fingerprint) -> Result<SensitiveString> {
        Ok(self.stage(fingerprint, None).await?.secret)
    }

    /// Like [`evaluate`](Self::evaluate), but a raw value supplied by the
    /// caller is never adopted. Only the provider writes the stash.
    pub async fn evaluate_offered(
        &self,
        fingerprint: &Fingerprint,
        offered: &SensitiveString,
    ) -> Result<SensitiveString> {
        let staged = self.stage(fingerprint, None).await?;
        if *offered != staged.secret {
            Counters::bump(&self.counters.ignored_offers);
            debug!(
                target_id = %self.target,
                transition = %staged.transition,
                "offered credential differs from staged value; ignored"
            );
        }
        Ok(staged.secret)
    }

    /// Like [`evaluate`](Self::evaluate), abandoning the fetch when `cancel`
    /// fires. A cancelled evaluation leaves the staged record untouched.
    pub async fn evaluate_cancellable(
        &self,
        fingerprint: &Fingerprint,
        cancel: &CancellationToken,
    ) -> Result<SensitiveString> {
        Ok(self.stage(fingerprint, Some(cancel)).await?.secret)
    }

    /// Full evaluation, reporting generation and transition.
    #[instrument(skip(self, fingerprint, cancel), fields(target_id = %self.target, fingerprint = %fingerprint.short()))]
    pub async fn stage(
        &self,
        fingerprint: &Fingerprint,
        cancel: Option<&CancellationToken>,
    ) -> Result<Staged> {
        let mut slot = self.lock(cancel).await?;
        self.hydrate(&mut slot).await?;

        let decision = slot.state.decide(fingerprint);
        let transition = slot.state.transition_for(&decision);

        if let (Decision::Reuse, Some(record)) = (&decision, slot.state.record()) {
            Counters::bump(&self.counters.reuses);
            debug!(generation = record.generation, "fingerprint unchanged; reusing staged secret");
            return Ok(Staged {
                secret: record.secret.clone(),
                fingerprint: record.staged_under.clone(),
                generation: record.generation,
                transition,
            });
        }

        if let Decision::NeedsReplace { staged_under, generation } = &decision {
            info!(
                previous = %staged_under.short(),
                previous_generation = generation,
                "fingerprint changed; fetching replacement credential"
            );
        } else {
            info!("no staged credential; fetching initial value");
        }

        Counters::bump(&self.counters.fetch_attempts);
        let secret = match fetch_bounded(self.provider.as_ref(), &self.policy, cancel).await {
            Ok(secret) => secret,
            Err(e) => {
                Counters::bump(&self.counters.fetch_failures);
                return Err(e);
            }
        };

        let record = slot.state.next_record(secret, fingerprint.clone());
        // Until the save returns, the store may hold either record. If this
        // future is dropped mid-save, the next evaluation reloads from the store.
        slot.hydrated = false;
        let saved = self.store.save(&self.target, &record).await;
        slot.hydrated = true;
        saved?;

        match transition {
            Transition::Replaced => Counters::bump(&self.counters.replacements),
            _ => Counters::bump(&self.counters.creations),
        }
        info!(generation = record.generation, %transition, "credential staged");

        let staged = Staged {
            secret: record.secret.clone(),
            fingerprint: record.staged_under.clone(),
            generation: record.generation,
            transition,
        };
        slot.state = StashState::Stable(record);
        Ok(staged)
    }

    /// Secret-free view of the staged record, if any.
    pub async fn snapshot(&self) -> Result<Option<StashSnapshot>> {
        let mut slot = self.slot.lock().await;
        self.hydrate(&mut slot).await?;
        Ok(slot.state.record().map(|r| StashSnapshot {
            target: self.target.to_string(),
            fingerprint: r.staged_under.clone(),
            generation: r.generation,
            staged_at: r.staged_at,
        }))
    }

    /// Drop the staged record from memory and the store. The next evaluation
    /// fetches as if the stash were new.
    #[instrument(skip(self), fields(target_id = %self.target))]
    pub async fn forget(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        self.store.remove(&self.target).await?;
        slot.state = StashState::Empty;
        slot.hydrated = true;
        info!("staged credential forgotten");
        Ok(())
    }

    async fn lock(&self, cancel: Option<&CancellationToken>) -> Result<MutexGuard<'_, Slot>> {
        match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(StashError::Cancelled),
                guard = self.slot.lock() => Ok(guard),
            },
            None => Ok(self.slot.lock().await),
        }
    }

    async fn hydrate(&self, slot: &mut Slot) -> Result<()> {
        if slot.hydrated {
            return Ok(());
        }
        let loaded = self.store.load(&self.target).await?;
        if let Some(record) = &loaded {
            debug!(
                target_id = %self.target,
                generation = record.generation,
                fingerprint = %record.staged_under.short(),
                "hydrated staged credential from store"
            );
        }
        slot.state = StashState::from_record(loaded);
        slot.hydrated = true;
        Ok(())
    }
}

impl std::fmt::Debug for SecretStash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStash")
            .field("target", &self.target)
            .field("provider", &self.provider.name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
