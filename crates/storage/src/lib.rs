//! # Stratus Storage
//!
//! The small blob store the provider keeps its durable state in. Only three
//! operations matter: get, put and delete by key. A missing key is reported
//! as [`StorageError::NotFound`], distinct from every transport or permission
//! failure, because callers treat absence as meaningful.
//!
//! Backends:
//! - [`MemoryBlobStore`]: process-local, with scripted failures for tests
//! - [`FileBlobStore`]: one file per key under a root directory

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;

use async_trait::async_trait;

pub use error::{StorageError, StorageResult};
pub use file::FileBlobStore;
pub use memory::{BlobOp, MemoryBlobStore};

/// Key/value storage for small opaque objects.
///
/// Writes are last-write-wins; no backend offers create-if-absent.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Make sure the backing container (bucket, directory) exists.
    async fn ensure_container(&self) -> StorageResult<()>;

    /// Read the object stored at `key`.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Store `data` at `key`, replacing any previous object.
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Remove the object at `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;
}
