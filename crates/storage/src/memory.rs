//! In-memory blob store

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};

use crate::{BlobStore, StorageError, StorageResult};

/// Blob store operation, for scripting failures and inspecting history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobOp {
    /// [`BlobStore::ensure_container`]
    EnsureContainer,
    /// [`BlobStore::get`]
    Get,
    /// [`BlobStore::put`]
    Put,
    /// [`BlobStore::delete`]
    Delete,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<String, Vec<u8>>,
    failures: HashMap<BlobOp, VecDeque<StorageError>>,
    history: Vec<(BlobOp, String)>,
}

/// Process-local blob store.
///
/// Clones share the same objects. Failures queued with
/// [`inject_failure`](Self::inject_failure) are returned, in order, by the
/// next calls of that operation.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBlobStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with `error`
    pub fn inject_failure(&self, op: BlobOp, error: StorageError) {
        self.inner
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Whether an object exists at `key`
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().objects.contains_key(key)
    }

    /// Raw object bytes, bypassing history and failure scripting
    #[must_use]
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().objects.get(key).cloned()
    }

    /// Every call made so far, with the key it touched
    #[must_use]
    pub fn history(&self) -> Vec<(BlobOp, String)> {
        self.inner.lock().history.clone()
    }

    /// How many times `op` has been called
    #[must_use]
    pub fn count(&self, op: BlobOp) -> usize {
        self.inner
            .lock()
            .history
            .iter()
            .filter(|(o, _)| *o == op)
            .count()
    }

    fn record(&self, op: BlobOp, key: &str) -> StorageResult<MutexGuard<'_, Inner>> {
        let mut inner = self.inner.lock();
        inner.history.push((op, key.to_string()));
        if let Some(err) = inner.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(inner)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn ensure_container(&self) -> StorageResult<()> {
        self.record(BlobOp::EnsureContainer, "")?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let inner = self.record(BlobOp::Get, key)?;
        inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let mut inner = self.record(BlobOp::Put, key)?;
        inner.objects.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut inner = self.record(BlobOp::Delete, key)?;
        inner.objects.remove(key);
        Ok(())
    }
}
