//! Filesystem-backed stash store.
//!
//! Layout: `<root>/stashes/<target>.json`, one document per target.
//!
//! Documents hold the raw secret, so the directory is expected to be private
//! to the hosting process. Writes go through a temp file in the same directory
//! followed by a rename; the temp file is created `0600` on unix and keeps that
//! mode after the rename.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StateError;
use crate::sensitive::SensitiveString;
use crate::storage_traits::{Fingerprint, StashRecord, StashStore, StorageResult, TargetId};

/// Current on-disk document version.
pub const DOCUMENT_VERSION: u32 = 1;

const DOC_EXTENSION: &str = "json";

#[derive(Serialize, Deserialize)]
struct StashDocument {
    version: u32,
    target: TargetId,
    #[serde(with = "crate::sensitive::exposed")]
    secret: SensitiveString,
    staged_under: Fingerprint,
    generation: u64,
    staged_at: DateTime<Utc>,
}

impl StashDocument {
    fn from_record(target: &TargetId, record: &StashRecord) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            target: target.clone(),
            secret: record.secret.clone(),
            staged_under: record.staged_under.clone(),
            generation: record.generation,
            staged_at: record.staged_at,
        }
    }

    fn into_record(self) -> StorageResult<StashRecord> {
        if self.version != DOCUMENT_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: self.version,
                expected: DOCUMENT_VERSION,
            });
        }
        Ok(StashRecord {
            secret: self.secret,
            staged_under: self.staged_under,
            generation: self.generation,
            staged_at: self.staged_at,
        })
    }
}

/// Stash store persisting one JSON document per target.
#[derive(Debug, Clone)]
pub struct FsStashStore {
    stashes_dir: PathBuf,
}

impl FsStashStore {
    /// Create a new `FsStashStore` rooted at `root`. Creates `root/stashes/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let stashes_dir = root.as_ref().join("stashes");
        fs::create_dir_all(&stashes_dir)?;
        Ok(Self { stashes_dir })
    }

    fn doc_path(&self, target: &TargetId) -> PathBuf {
        self.stashes_dir
            .join(format!("{}.{}", target.as_str(), DOC_EXTENSION))
    }

    fn load_blocking(&self, target: &TargetId) -> StorageResult<Option<StashRecord>> {
        let path = self.doc_path(target);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::Io(e)),
        };
        let doc: StashDocument = serde_json::from_slice(&bytes)?;
        if &doc.target != target {
            return Err(StateError::Backend(format!(
                "document at {} belongs to target {}",
                path.display(),
                doc.target
            )));
        }
        doc.into_record().map(Some)
    }

    fn save_blocking(&self, target: &TargetId, record: &StashRecord) -> StorageResult<()> {
        let path = self.doc_path(target);
        let doc = StashDocument::from_record(target, record);
        let bytes = serde_json::to_vec_pretty(&doc)?;

        let mut tmp = NamedTempFile::new_in(&self.stashes_dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        debug!(
            target_id = %target,
            generation = record.generation,
            path = %path.display(),
            "stash document written"
        );
        Ok(())
    }

    fn remove_blocking(&self, target: &TargetId) -> StorageResult<()> {
        match fs::remove_file(self.doc_path(target)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::Io(e)),
        }
    }

    fn targets_blocking(&self) -> StorageResult<Vec<TargetId>> {
        let mut targets = Vec::new();
        for entry in fs::read_dir(&self.stashes_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e != DOC_EXTENSION).unwrap_or(true) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            // Leftover temp files and foreign names are not targets.
            if let Ok(target) = TargetId::new(stem) {
                targets.push(target);
            }
        }
        targets.sort();
        Ok(targets)
    }

    async fn blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(FsStashStore) -> StorageResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(store))
            .await
            .map_err(|e| StateError::Backend(format!("blocking task failed: {}", e)))?
    }
}

#[async_trait]
impl StashStore for FsStashStore {
    async fn load(&self, target: &TargetId) -> StorageResult<Option<StashRecord>> {
        let target = target.clone();
        self.blocking(move |store| store.load_blocking(&target))
            .await
    }

    async fn save(&self, target: &TargetId, record: &StashRecord) -> StorageResult<()> {
        let target = target.clone();
        let record = record.clone();
        self.blocking(move |store| store.save_blocking(&target, &record))
            .await
    }

    async fn remove(&self, target: &TargetId) -> StorageResult<()> {
        let target = target.clone();
        self.blocking(move |store| store.remove_blocking(&target))
            .await
    }

    async fn targets(&self) -> StorageResult<Vec<TargetId>> {
        self.blocking(|store| store.targets_blocking()).await
    }
}
