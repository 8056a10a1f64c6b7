//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryStashStore` satisfies the `StashStore` contract without touching the
//! filesystem, counts loads and saves, and can be told to fail saves so callers
//! can verify that a failed persist never publishes a new record.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StateError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryStashStore
// ---------------------------------------------------------------------------

/// In-memory stash store backed by a `HashMap<target, record>`.
#[derive(Debug, Default)]
pub struct MemoryStashStore {
    records: Mutex<HashMap<String, StashRecord>>,
    loads: AtomicU64,
    saves: AtomicU64,
    fail_saves: AtomicBool,
}

impl MemoryStashStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a record, as if a previous process had saved it.
    pub fn with_record(self, target: &TargetId, record: StashRecord) -> Self {
        self.records
            .lock()
            .unwrap()
            .insert(target.as_str().to_string(), record);
        self
    }

    /// Make every subsequent `save` fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of `load` calls observed.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of successful `save` calls observed.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StashStore for MemoryStashStore {
    async fn load(&self, target: &TargetId) -> StorageResult<Option<StashRecord>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().unwrap();
        Ok(records.get(target.as_str()).cloned())
    }

    async fn save(&self, target: &TargetId, record: &StashRecord) -> StorageResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StateError::Backend(format!(
                "injected save failure for target {}",
                target
            )));
        }
        let mut records = self.records.lock().unwrap();
        records.insert(target.as_str().to_string(), record.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, target: &TargetId) -> StorageResult<()> {
        let mut records = self.records.lock().unwrap();
        records.remove(target.as_str());
        Ok(())
    }

    async fn targets(&self) -> StorageResult<Vec<TargetId>> {
        let records = self.records.lock().unwrap();
        let mut targets = records
            .keys()
            .map(|k| TargetId::new(k.clone()))
            .collect::<StorageResult<Vec<_>>>()?;
        targets.sort();
        Ok(targets)
    }
}
