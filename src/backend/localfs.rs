//! Local filesystem backend: one file per blob under a fan-out directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{BackendError, BackendKey, StorageBackend};
use crate::codec::Wrapper;

/// Blob store rooted at a directory. Keys look like `ab/ab12..ef.png`;
/// the two-character prefix keeps any single directory small.
#[derive(Clone)]
pub struct LocalFsBackend {
    root: PathBuf,
    wrapper: Wrapper,
    max_resource_size: u64,
}

impl LocalFsBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            wrapper: Wrapper::Identity,
            max_resource_size: 100_000_000,
        }
    }

    /// Model an image-only host rooted on disk (used to exercise wrappers).
    pub fn requiring(mut self, wrapper: Wrapper) -> Self {
        self.wrapper = wrapper;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    fn identifier(&self) -> &str {
        "localfs"
    }

    fn max_resource_size(&self) -> u64 {
        self.max_resource_size
    }

    fn required_wrapper(&self) -> Wrapper {
        self.wrapper
    }

    #[tracing::instrument(name = "LocalFsBackend.put", level = "trace", skip_all, fields(bytes = data.len()))]
    async fn put(&self, data: &[u8]) -> Result<BackendKey, BackendError> {
        let id = Uuid::new_v4().simple().to_string();
        let key = format!("{}/{}.{}", &id[..2], id, self.wrapper.extension());
        let path = self.path_for(&key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| BackendError::from_io(e, &key))?;
        }
        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| BackendError::from_io(e, &key))?;
        file.write_all(data)
            .await
            .map_err(|e| BackendError::from_io(e, &key))?;
        file.flush()
            .await
            .map_err(|e| BackendError::from_io(e, &key))?;
        Ok(key)
    }

    #[tracing::instrument(name = "LocalFsBackend.get", level = "trace", skip(self))]
    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        fs::read(self.path_for(key))
            .await
            .map_err(|e| BackendError::from_io(e, key))
    }

    async fn list(&self) -> Result<Vec<BackendKey>, BackendError> {
        let mut keys = Vec::new();
        let mut outer = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(BackendError::Unavailable(e.to_string())),
        };
        while let Some(entry) = outer
            .next_entry()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?
        {
            if !entry.path().is_dir() {
                continue;
            }
            let prefix = entry.file_name();
            let mut inner = fs::read_dir(entry.path())
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
            while let Some(blob) = inner
                .next_entry()
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))?
            {
                keys.push(format!(
                    "{}/{}",
                    prefix.to_string_lossy(),
                    blob.file_name().to_string_lossy()
                ));
            }
        }
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackendError::from_io(e, key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        let key = backend.put(b"on disk").await.unwrap();
        assert_eq!(backend.get(&key).await.unwrap(), b"on disk");
        assert!(tmp.path().join(&key).is_file());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        assert!(matches!(
            backend.get("ab/absent.bin").await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_idempotent_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        let key = backend.put(b"x").await.unwrap();
        assert_eq!(backend.list().await.unwrap(), vec![key.clone()]);
        backend.delete(&key).await.unwrap();
        backend.delete(&key).await.unwrap();
        assert!(backend.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrapper_extension_in_key() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path()).requiring(Wrapper::Png);
        let key = backend.put(b"pretend image").await.unwrap();
        assert!(key.ends_with(".png"));
    }
}
