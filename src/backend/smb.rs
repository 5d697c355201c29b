//! SMB backend: drives a kernel-mounted CIFS share through the filesystem
//! code path. Mounting (and the credential handshake it entails) happens
//! outside the process; this backend only needs the mount point.

use async_trait::async_trait;

use super::localfs::LocalFsBackend;
use super::{BackendError, BackendKey, StorageBackend};
use crate::codec::Wrapper;
use std::path::Path;

#[derive(Clone)]
pub struct SmbBackend {
    inner: LocalFsBackend,
}

impl SmbBackend {
    /// `mount_point` is where the share is mounted (e.g. `/mnt/nas/vault`).
    pub fn new<P: AsRef<Path>>(mount_point: P) -> Self {
        Self {
            inner: LocalFsBackend::new(mount_point),
        }
    }

    pub fn requiring(mut self, wrapper: Wrapper) -> Self {
        self.inner = self.inner.requiring(wrapper);
        self
    }
}

#[async_trait]
impl StorageBackend for SmbBackend {
    fn identifier(&self) -> &str {
        "smb"
    }

    fn max_resource_size(&self) -> u64 {
        self.inner.max_resource_size()
    }

    fn required_wrapper(&self) -> Wrapper {
        self.inner.required_wrapper()
    }

    async fn put(&self, data: &[u8]) -> Result<BackendKey, BackendError> {
        self.inner.put(data).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        self.inner.get(key).await
    }

    async fn list(&self) -> Result<Vec<BackendKey>, BackendError> {
        self.inner.list().await
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.inner.delete(key).await
    }
}
