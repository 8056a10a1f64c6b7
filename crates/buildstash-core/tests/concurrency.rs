//! Serialization, timeout and cancellation of stash evaluations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use buildstash_core::fakes::SequenceProvider;
use buildstash_core::{FetchPolicy, SecretStash, StashError, StashRegistry, TargetId};
use futures::future::join_all;
use stash_state::fakes::MemoryStashStore;
use stash_state::{Fingerprint, StashRecord, StashStore, StorageResult};
use tokio_util::sync::CancellationToken;

/// Store whose `save` lands immediately but is slow to report back.
#[derive(Default)]
struct SlowAckStore {
    inner: MemoryStashStore,
    slow: AtomicBool,
}

#[async_trait]
impl StashStore for SlowAckStore {
    async fn load(&self, target: &TargetId) -> StorageResult<Option<StashRecord>> {
        self.inner.load(target).await
    }

    async fn save(&self, target: &TargetId, record: &StashRecord) -> StorageResult<()> {
        self.inner.save(target, record).await?;
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(())
    }

    async fn remove(&self, target: &TargetId) -> StorageResult<()> {
        self.inner.remove(target).await
    }

    async fn targets(&self) -> StorageResult<Vec<TargetId>> {
        self.inner.targets().await
    }
}

fn fp(seed: &str) -> Fingerprint {
    Fingerprint::from_bytes(seed.as_bytes())
}

fn stash(provider: Arc<SequenceProvider>) -> Arc<SecretStash> {
    Arc::new(SecretStash::new(
        TargetId::new("app").unwrap(),
        provider,
        Arc::new(MemoryStashStore::new()),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_evaluations_fetch_once() {
    let provider =
        Arc::new(SequenceProvider::new(["tok-1", "tok-2"]).with_delay(Duration::from_millis(200)));
    let stash = stash(provider.clone());
    let f = fp("a");

    let results = join_all((0..8).map(|_| stash.evaluate(&f))).await;

    for r in &results {
        assert_eq!(r.as_ref().unwrap().expose_secret(), "tok-1");
    }
    assert_eq!(provider.fetch_count(), 1);
    assert_eq!(stash.stats().reuses, 7);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_tasks_on_stale_fingerprint_fetch_once() {
    let provider = Arc::new(SequenceProvider::new(["tok-1", "tok-2", "tok-3"]));
    let stash = stash(provider.clone());
    stash.evaluate(&fp("a")).await.unwrap();
    provider.set_delay(Some(Duration::from_millis(200)));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let stash = stash.clone();
            tokio::spawn(async move { stash.evaluate(&fp("b")).await })
        })
        .collect();

    for h in handles {
        assert_eq!(h.await.unwrap().unwrap().expose_secret(), "tok-2");
    }
    assert_eq!(provider.fetch_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_keeps_record() {
    let provider = Arc::new(SequenceProvider::new(["tok-1", "tok-2"]));
    let stash = Arc::new(
        SecretStash::new(
            TargetId::new("app").unwrap(),
            provider.clone(),
            Arc::new(MemoryStashStore::new()),
        )
        .with_policy(FetchPolicy::with_timeout_ms(100)),
    );
    stash.evaluate(&fp("a")).await.unwrap();

    provider.set_delay(Some(Duration::from_secs(5)));
    let err = stash.evaluate(&fp("b")).await.unwrap_err();
    assert!(matches!(err, StashError::CredentialFetchFailed { ref reason } if reason.contains("timed out")));

    assert_eq!(stash.evaluate(&fp("a")).await.unwrap().expose_secret(), "tok-1");
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_keeps_record() {
    let provider = Arc::new(SequenceProvider::new(["tok-1", "tok-2"]));
    let stash = stash(provider.clone());
    stash.evaluate(&fp("a")).await.unwrap();
    provider.set_delay(Some(Duration::from_secs(5)));

    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        })
    };

    let err = stash
        .evaluate_cancellable(&fp("b"), &token)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, StashError::Cancelled));
    provider.set_delay(None);
    assert_eq!(stash.evaluate(&fp("a")).await.unwrap().expose_secret(), "tok-1");
    assert_eq!(stash.snapshot().await.unwrap().unwrap().generation, 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_evaluation_keeps_record() {
    let provider = Arc::new(SequenceProvider::new(["tok-1", "tok-2"]));
    let stash = stash(provider.clone());
    stash.evaluate(&fp("a")).await.unwrap();
    provider.set_delay(Some(Duration::from_secs(5)));

    let abandoned = tokio::time::timeout(Duration::from_millis(10), stash.evaluate(&fp("b"))).await;
    assert!(abandoned.is_err());

    provider.set_delay(None);
    assert_eq!(stash.evaluate(&fp("a")).await.unwrap().expose_secret(), "tok-1");
}

#[tokio::test(start_paused = true)]
async fn test_dropped_during_save_reloads_from_store() {
    let provider = Arc::new(SequenceProvider::new(["tok-1", "tok-2", "tok-3"]));
    let store = Arc::new(SlowAckStore::default());
    let stash = SecretStash::new(TargetId::new("app").unwrap(), provider.clone(), store.clone());
    stash.evaluate(&fp("a")).await.unwrap();

    store.slow.store(true, Ordering::SeqCst);
    let abandoned = tokio::time::timeout(Duration::from_millis(10), stash.evaluate(&fp("b"))).await;
    assert!(abandoned.is_err());
    store.slow.store(false, Ordering::SeqCst);

    let staged = stash.stage(&fp("b"), None).await.unwrap();
    assert_eq!(staged.secret.expose_secret(), "tok-2");
    assert_eq!(staged.generation, 1);
    assert_eq!(provider.fetch_count(), 2);
    assert_eq!(store.inner.load_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_for_lock() {
    let provider =
        Arc::new(SequenceProvider::new(["tok-1", "tok-2"]).with_delay(Duration::from_secs(5)));
    let stash = stash(provider.clone());

    let holder = {
        let stash = stash.clone();
        tokio::spawn(async move { stash.evaluate(&fp("a")).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(provider.fetch_count(), 1);

    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        })
    };

    let err = stash
        .evaluate_cancellable(&fp("b"), &token)
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, StashError::Cancelled));
    assert!(!holder.is_finished());
    assert_eq!(provider.fetch_count(), 1);

    assert_eq!(holder.await.unwrap().unwrap().expose_secret(), "tok-1");
    assert_eq!(stash.snapshot().await.unwrap().unwrap().generation, 0);
}

#[tokio::test(start_paused = true)]
async fn test_targets_do_not_block_each_other() {
    let registry = StashRegistry::new(
        Arc::new(SequenceProvider::new(["unused"])),
        Arc::new(MemoryStashStore::new()),
    );
    let slow = registry.register(
        TargetId::new("slow").unwrap(),
        Arc::new(SequenceProvider::new(["slow-1"]).with_delay(Duration::from_secs(10))),
    );
    let fast = registry.register(
        TargetId::new("fast").unwrap(),
        Arc::new(SequenceProvider::new(["fast-1"])),
    );

    let pending = tokio::spawn(async move { slow.evaluate(&fp("s")).await });
    tokio::task::yield_now().await;

    let value = tokio::time::timeout(Duration::from_millis(100), fast.evaluate(&fp("f")))
        .await
        .expect("fast target blocked by slow target")
        .unwrap();
    assert_eq!(value.expose_secret(), "fast-1");
    assert!(!pending.is_finished());

    assert_eq!(pending.await.unwrap().unwrap().expose_secret(), "slow-1");
}
