//! Filesystem blob store: one file per key under a root directory

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::{BlobStore, StorageError, StorageResult};

/// Blob store backed by a local directory.
///
/// Keys may contain `/` to nest objects in subdirectories; absolute keys and
/// `..` components are rejected.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Create a store rooted at `root`. Nothing touches the disk until the
    /// first operation.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory objects are stored under
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

/// Write to a sibling temp file, then rename over the target so readers never
/// observe a partial object.
async fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_file_name(format!(
        "{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("object"),
        Uuid::new_v4()
    ));

    tokio::fs::write(&temp_path, data).await?;
    if let Err(err) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err);
    }
    Ok(())
}

fn classify(key: &str, err: std::io::Error, write: bool) -> StorageError {
    match err.kind() {
        ErrorKind::NotFound if !write => StorageError::not_found(key),
        ErrorKind::PermissionDenied => StorageError::PermissionDenied {
            key: key.to_string(),
            reason: err.to_string(),
        },
        _ if write => StorageError::Write {
            key: key.to_string(),
            source: err,
        },
        _ => StorageError::Read {
            key: key.to_string(),
            source: err,
        },
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn ensure_container(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|err| {
            classify(&self.root.display().to_string(), err, true)
        })?;
        debug!(root = %self.root.display(), "blob store directory ready");
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|err| classify(key, err, false))
    }

    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| classify(key, err, true))?;
        }
        atomic_write(&path, data)
            .await
            .map_err(|err| classify(key, err, true))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(classify(key, err, true)),
        }
    }
}
