//! Durable bootstrap record

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stratus_storage::{BlobStore, StorageError};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::{Error, InstanceId, Result};

/// What bootstrap leaves behind: the control-plane instances
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BootstrapState {
    /// Control-plane instance ids, in start order
    #[serde(rename = "zookeeper-instances", default)]
    pub zookeeper_instances: Vec<InstanceId>,
}

/// Reads and writes the [`BootstrapState`] of one environment.
///
/// The container is verified before the first read or write, and the outcome
/// of that check (including a failure) is reused for the life of the store.
pub struct StateStore {
    store: Arc<dyn BlobStore>,
    key: String,
    container: OnceCell<std::result::Result<(), Arc<StorageError>>>,
}

impl StateStore {
    /// State kept in `store` under `key`
    pub fn new(store: Arc<dyn BlobStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            container: OnceCell::new(),
        }
    }

    /// Blob key of the record
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Verify the backing container exists, at most once
    pub async fn ensure_container(&self) -> Result<()> {
        let outcome = self
            .container
            .get_or_init(|| async {
                debug!("verifying state container");
                self.store.ensure_container().await.map_err(Arc::new)
            })
            .await;
        outcome
            .clone()
            .map_err(|e| Error::state("verify state container", e))
    }

    /// Write `state`, replacing any previous record
    #[instrument(skip(self, state), fields(key = %self.key))]
    pub async fn save(&self, state: &BootstrapState) -> Result<()> {
        self.ensure_container().await?;
        let data = serde_json::to_vec(state).map_err(|source| Error::StateFormat {
            key: self.key.clone(),
            source,
        })?;
        self.store
            .put(&self.key, &data)
            .await
            .map_err(|e| Error::state("save bootstrap state", e))?;
        debug!(instances = state.zookeeper_instances.len(), "saved bootstrap state");
        Ok(())
    }

    /// Read the record. `Ok(None)` means the environment was never
    /// bootstrapped; every other storage failure is an error.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn load(&self) -> Result<Option<BootstrapState>> {
        self.ensure_container().await?;
        let data = match self.store.get(&self.key).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(Error::state("load bootstrap state", e)),
        };
        let state = serde_json::from_slice(&data).map_err(|source| Error::StateFormat {
            key: self.key.clone(),
            source,
        })?;
        Ok(Some(state))
    }

    /// Remove the record. Removing an absent record succeeds.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn delete(&self) -> Result<()> {
        self.store
            .delete(&self.key)
            .await
            .map_err(|e| Error::state("delete bootstrap state", e))
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("key", &self.key)
            .field("container_checked", &self.container.initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stratus_storage::{BlobOp, MemoryBlobStore};

    fn store() -> (MemoryBlobStore, StateStore) {
        let blobs = MemoryBlobStore::new();
        let state = StateStore::new(Arc::new(blobs.clone()), "provider-state");
        (blobs, state)
    }

    fn record(ids: &[&str]) -> BootstrapState {
        BootstrapState {
            zookeeper_instances: ids.iter().copied().map(InstanceId::from).collect(),
        }
    }

    #[tokio::test]
    async fn absent_record_loads_as_none() {
        let (_, state) = store();
        assert_eq!(state.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn saved_record_loads_back() {
        let (blobs, state) = store();
        state.save(&record(&["i-1"])).await.unwrap();

        assert_eq!(state.load().await.unwrap(), Some(record(&["i-1"])));
        let raw = String::from_utf8(blobs.object("provider-state").unwrap()).unwrap();
        assert_eq!(raw, r#"{"zookeeper-instances":["i-1"]}"#);
    }

    #[tokio::test]
    async fn container_is_checked_once() {
        let (blobs, state) = store();
        assert_eq!(state.load().await.unwrap(), None);
        state.save(&record(&["i-1"])).await.unwrap();
        state.save(&record(&["i-2"])).await.unwrap();

        assert_eq!(blobs.count(BlobOp::EnsureContainer), 1);
    }

    #[tokio::test]
    async fn container_failure_is_remembered() {
        let (blobs, state) = store();
        blobs.inject_failure(BlobOp::EnsureContainer, StorageError::unavailable("no bucket"));

        let first = state.save(&record(&["i-1"])).await.unwrap_err();
        let second = state.save(&record(&["i-1"])).await.unwrap_err();

        assert!(matches!(first, Error::State { .. }));
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(blobs.count(BlobOp::EnsureContainer), 1);
        assert_eq!(blobs.count(BlobOp::Put), 0);
    }

    #[tokio::test]
    async fn other_read_failures_are_errors() {
        let (blobs, state) = store();
        blobs.inject_failure(
            BlobOp::Get,
            StorageError::PermissionDenied {
                key: "provider-state".to_string(),
                reason: "forbidden".to_string(),
            },
        );

        let err = state.load().await.unwrap_err();
        assert!(matches!(err, Error::State { .. }));
    }

    #[tokio::test]
    async fn malformed_record_is_a_format_error() {
        let (blobs, state) = store();
        blobs.put("provider-state", b"not json").await.unwrap();

        let err = state.load().await.unwrap_err();
        assert!(matches!(err, Error::StateFormat { key, .. } if key == "provider-state"));
    }

    #[tokio::test]
    async fn delete_of_absent_record_succeeds() {
        let (blobs, state) = store();
        state.save(&record(&["i-1"])).await.unwrap();
        state.delete().await.unwrap();
        state.delete().await.unwrap();

        assert!(!blobs.contains("provider-state"));
    }
}
