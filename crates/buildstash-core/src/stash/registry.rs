use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stash_state::{StashStore, TargetId};
use tracing::debug;

use super::fetch::FetchPolicy;
use super::secret_stash::SecretStash;
use crate::domain::Result;
use crate::provider::CredentialProvider;

/// One [`SecretStash`] per target, sharing a provider and a store.
///
/// Evaluations for different targets never contend on each other's locks.
pub struct StashRegistry {
    provider: Arc<dyn CredentialProvider>,
    store: Arc<dyn StashStore>,
    policy: FetchPolicy,
    stashes: Mutex<HashMap<TargetId, Arc<SecretStash>>>,
}

impl StashRegistry {
    pub fn new(provider: Arc<dyn CredentialProvider>, store: Arc<dyn StashStore>) -> Self {
        Self {
            provider,
            store,
            policy: FetchPolicy::default(),
            stashes: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The stash for `target`, created on first use.
    pub fn stash(&self, target: &TargetId) -> Arc<SecretStash> {
        let mut stashes = self.stashes.lock().unwrap_or_else(|p| p.into_inner());
        stashes
            .entry(target.clone())
            .or_insert_with(|| {
                debug!(target_id = %target, "creating stash");
                Arc::new(
                    SecretStash::new(target.clone(), self.provider.clone(), self.store.clone())
                        .with_policy(self.policy.clone()),
                )
            })
            .clone()
    }

    /// Register a stash for `target` backed by its own provider. Replaces any
    /// stash already registered for the target.
    pub fn register(
        &self,
        target: TargetId,
        provider: Arc<dyn CredentialProvider>,
    ) -> Arc<SecretStash> {
        let stash = Arc::new(
            SecretStash::new(target.clone(), provider, self.store.clone())
                .with_policy(self.policy.clone()),
        );
        let mut stashes = self.stashes.lock().unwrap_or_else(|p| p.into_inner());
        stashes.insert(target, stash.clone());
        stash
    }

    /// Targets with a live stash in this process, sorted.
    pub fn active_targets(&self) -> Vec<TargetId> {
        let stashes = self.stashes.lock().unwrap_or_else(|p| p.into_inner());
        let mut targets: Vec<TargetId> = stashes.keys().cloned().collect();
        targets.sort();
        targets
    }

    /// Targets with a persisted record.
    pub async fn stored_targets(&self) -> Result<Vec<TargetId>> {
        Ok(self.store.targets().await?)
    }
}
