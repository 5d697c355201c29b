//! High-level storage client: wraps a backend with the retry policy.
//!
//! Transient failures are retried here with bounded exponential backoff and
//! jitter; everything above this layer sees a backend that either worked or
//! failed for good.

use std::time::Duration;

use rand::RngCore;
use tracing::warn;

use super::{BackendError, BackendKey, StorageBackend};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 100,
        }
    }
}

pub struct StorageClient<B> {
    backend: B,
    retry: RetryPolicy,
}

impl<B: StorageBackend> StorageClient<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(backend: B, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn put(&self, data: &[u8]) -> Result<BackendKey, BackendError> {
        self.with_backoff("put", || self.backend.put(data)).await
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        self.with_backoff("get", || self.backend.get(key)).await
    }

    pub async fn list(&self) -> Result<Vec<BackendKey>, BackendError> {
        self.with_backoff("list", || self.backend.list()).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.with_backoff("delete", || self.backend.delete(key)).await
    }

    async fn with_backoff<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.attempts => {
                    attempt += 1;
                    let jitter = rand::rng().next_u64() % 20;
                    let delay = self.retry.base_delay_ms * (1u64 << attempt) + jitter;
                    warn!(
                        backend = self.backend.identifier(),
                        op, attempt, delay_ms = delay, "transient backend error: {e}; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
