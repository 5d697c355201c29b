//! Storage backends: the blob-store contract every concrete service fulfils.
//!
//! A backend stores opaque blobs under backend-chosen keys and must return
//! them byte-exactly. Backends that only accept specific formats (photo
//! hosts) advertise the wrapper that satisfies them via
//! [`StorageBackend::required_wrapper`].

pub mod client;
pub mod localfs;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;
pub mod smb;

pub use client::StorageClient;

use async_trait::async_trait;

use crate::codec::Wrapper;

/// Identifier a backend hands back on upload; stable for the blob's lifetime.
pub type BackendKey = String;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Transient failure (network, busy disk); the client retries these.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Permanent refusal (invalid blob, quota, permissions); surfaced as-is.
    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("no blob under key {0}")]
    NotFound(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }

    /// Classify a filesystem error the way the blob contract sees it.
    pub fn from_io(err: std::io::Error, key: &str) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => BackendError::NotFound(key.to_string()),
            ErrorKind::PermissionDenied | ErrorKind::InvalidInput => {
                BackendError::Rejected(err.to_string())
            }
            _ => BackendError::Unavailable(err.to_string()),
        }
    }
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short human-readable name used in logs and diagnostics.
    fn identifier(&self) -> &str;

    /// Largest blob this backend accepts; the operator tunes the resource
    /// size against it.
    fn max_resource_size(&self) -> u64 {
        100_000_000
    }

    /// Wrapper that makes blobs acceptable to this backend.
    fn required_wrapper(&self) -> Wrapper {
        Wrapper::Identity
    }

    /// Store a blob; the backend picks and returns the key.
    async fn put(&self, data: &[u8]) -> Result<BackendKey, BackendError>;

    /// Byte-exact retrieval of a stored blob.
    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError>;

    /// Keys of every blob currently stored.
    async fn list(&self) -> Result<Vec<BackendKey>, BackendError>;

    /// Remove a blob; deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), BackendError>;
}

#[async_trait]
impl<T: StorageBackend + ?Sized> StorageBackend for Box<T> {
    fn identifier(&self) -> &str {
        (**self).identifier()
    }

    fn max_resource_size(&self) -> u64 {
        (**self).max_resource_size()
    }

    fn required_wrapper(&self) -> Wrapper {
        (**self).required_wrapper()
    }

    async fn put(&self, data: &[u8]) -> Result<BackendKey, BackendError> {
        (**self).put(data).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        (**self).get(key).await
    }

    async fn list(&self) -> Result<Vec<BackendKey>, BackendError> {
        (**self).list().await
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        (**self).delete(key).await
    }
}
