//! In-memory backend for tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{BackendError, BackendKey, StorageBackend};
use crate::codec::Wrapper;

type Acceptor = dyn Fn(&[u8]) -> bool + Send + Sync;

/// Blob store backed by a process-local map.
///
/// An optional acceptor models hosts that validate uploads (e.g. an
/// image-only service): blobs the acceptor refuses fail permanently.
#[derive(Clone)]
pub struct MemoryBackend {
    blobs: Arc<RwLock<HashMap<BackendKey, Vec<u8>>>>,
    accept: Option<Arc<Acceptor>>,
    wrapper: Wrapper,
    max_resource_size: u64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(RwLock::new(HashMap::new())),
            accept: None,
            wrapper: Wrapper::Identity,
            max_resource_size: 100_000_000,
        }
    }

    /// Refuse blobs the predicate rejects, like a validating host would.
    pub fn with_acceptor(mut self, accept: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        self.accept = Some(Arc::new(accept));
        self
    }

    /// Advertise (and enforce) a wrapper requirement.
    pub fn requiring(mut self, wrapper: Wrapper) -> Self {
        self.wrapper = wrapper;
        self
    }

    /// Model a host with a tighter blob-size limit.
    pub fn with_max_resource_size(mut self, limit: u64) -> Self {
        self.max_resource_size = limit;
        self
    }

    /// Host that only accepts well-formed PNG files.
    pub fn png_only() -> Self {
        Self::new()
            .requiring(Wrapper::Png)
            .with_acceptor(|data| data.starts_with(&[0x89, b'P', b'N', b'G']))
    }

    /// Number of blobs currently stored.
    pub async fn blob_count(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn identifier(&self) -> &str {
        "memory"
    }

    fn max_resource_size(&self) -> u64 {
        self.max_resource_size
    }

    fn required_wrapper(&self) -> Wrapper {
        self.wrapper
    }

    async fn put(&self, data: &[u8]) -> Result<BackendKey, BackendError> {
        if let Some(accept) = &self.accept {
            if !accept(data) {
                return Err(BackendError::Rejected(
                    "blob failed the host's content validation".into(),
                ));
            }
        }
        let key = Uuid::new_v4().simple().to_string();
        self.blobs.write().await.insert(key.clone(), data.to_vec());
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(key.to_string()))
    }

    async fn list(&self) -> Result<Vec<BackendKey>, BackendError> {
        Ok(self.blobs.read().await.keys().cloned().collect())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.blobs.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let backend = MemoryBackend::new();
        let key = backend.put(b"blob").await.unwrap();
        assert_eq!(backend.get(&key).await.unwrap(), b"blob");
        backend.delete(&key).await.unwrap();
        assert!(matches!(backend.get(&key).await, Err(BackendError::NotFound(_))));
        // Idempotent delete.
        backend.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_png_only_refuses_raw_bytes() {
        let backend = MemoryBackend::png_only();
        assert!(matches!(
            backend.put(b"raw bytes").await,
            Err(BackendError::Rejected(_))
        ));
        assert_eq!(backend.required_wrapper(), Wrapper::Png);
    }

    #[tokio::test]
    async fn test_list_reflects_contents() {
        let backend = MemoryBackend::new();
        let a = backend.put(b"a").await.unwrap();
        let b = backend.put(b"b").await.unwrap();
        let mut keys = backend.list().await.unwrap();
        keys.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(keys, expected);
    }
}
