//! Resource builder: packs fragment bodies, seals them into one backend
//! blob, and commits the resource plus its fragments in one catalog batch.

use bytes::Bytes;
use tracing::{debug, info};
use uuid::Uuid;

use super::format;
use crate::backend::{StorageBackend, StorageClient};
use crate::catalog::{Catalog, ContentHash, ResourceRecord};
use crate::codec::Encapsulation;
use crate::error::SaverError;

#[derive(Debug, Clone, Copy)]
pub struct AssemblerConfig {
    /// Inner payload bytes at which the builder reports itself full.
    pub target_payload_size: u64,
    /// Fragment count at which the builder reports itself full.
    pub max_fragments: u32,
    /// Second-layer encapsulation applied around the payload.
    pub encapsulation: Encapsulation,
}

/// Accumulates fragment bodies for one resource.
///
/// Nothing is uploaded or written to the catalog until [`seal`]; a builder
/// dropped before sealing leaves no trace anywhere.
///
/// [`seal`]: ResourceBuilder::seal
pub struct ResourceBuilder {
    config: AssemblerConfig,
    frames: Vec<(ContentHash, Bytes)>,
    body_bytes: u64,
}

impl ResourceBuilder {
    pub fn new(config: AssemblerConfig) -> Self {
        Self {
            config,
            frames: Vec::new(),
            body_bytes: 0,
        }
    }

    pub fn append(&mut self, hash: ContentHash, body: Bytes) {
        self.body_bytes += body.len() as u64;
        self.frames.push((hash, body));
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() as u32 >= self.config.max_fragments
            || self.body_bytes >= self.config.target_payload_size
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn fragment_count(&self) -> usize {
        self.frames.len()
    }

    /// Recover the buffered fragments from a builder whose seal failed, so
    /// they can be re-queued for the next attempt.
    pub fn into_frames(self) -> Vec<(ContentHash, Bytes)> {
        self.frames
    }

    /// Encode, encapsulate, upload, and commit. On any failure nothing has
    /// been written to the catalog; recover the bodies with
    /// [`into_frames`](Self::into_frames) if the builder is still at hand.
    pub async fn seal<B: StorageBackend>(
        &mut self,
        client: &StorageClient<B>,
        catalog: &Catalog,
    ) -> Result<ResourceRecord, SaverError> {
        let (payload, placements) = format::encode_payload(&self.config.encapsulation, &self.frames);
        let packed = self.config.encapsulation.compressor.compress(&payload)?;
        let wrapped = self.config.encapsulation.wrapper.wrap(&packed)?;
        if wrapped.len() as u64 > client.backend().max_resource_size() {
            return Err(SaverError::BackendRejected(format!(
                "wrapped resource ({} bytes) exceeds the backend blob limit ({} bytes); \
                 lower the target resource size",
                wrapped.len(),
                client.backend().max_resource_size()
            )));
        }

        let backend_key = client.put(&wrapped).await?;
        let record = ResourceRecord {
            resource_id: Uuid::new_v4(),
            backend_key,
            encapsulation: self.config.encapsulation,
            payload_size: payload.len() as u64,
            stored_size: wrapped.len() as u64,
            fragment_count: self.frames.len() as u32,
        };
        if let Err(e) = catalog.commit_resource(&record, &placements).await {
            // The blob is orphaned on the backend; the next clean removes it.
            debug!(resource = %record.resource_id, "catalog commit failed after upload: {e}");
            return Err(e.into());
        }
        info!(
            resource = %record.resource_id,
            fragments = record.fragment_count,
            payload = record.payload_size,
            stored = record.stored_size,
            "sealed resource"
        );
        self.frames.clear();
        self.body_bytes = 0;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::catalog::kv::MemoryKv;
    use crate::codec::{Compressor, Wrapper};
    use std::sync::Arc;

    fn config() -> AssemblerConfig {
        AssemblerConfig {
            target_payload_size: 1000,
            max_fragments: 3,
            encapsulation: Encapsulation::new(Compressor::Zlib, Wrapper::Identity),
        }
    }

    fn body(byte: u8, len: usize) -> (ContentHash, Bytes) {
        let body = Bytes::from(vec![byte; len]);
        (ContentHash::of(&body), body)
    }

    #[tokio::test]
    async fn test_fullness_thresholds() {
        let mut builder = ResourceBuilder::new(config());
        assert!(!builder.is_full());
        let (h, b) = body(1, 1200);
        builder.append(h, b);
        assert!(builder.is_full(), "byte threshold");

        let mut builder = ResourceBuilder::new(config());
        for i in 0..3 {
            let (h, b) = body(i, 10);
            builder.append(h, b);
        }
        assert!(builder.is_full(), "count threshold");
    }

    #[tokio::test]
    async fn test_seal_commits_resource_and_fragments() {
        let client = StorageClient::new(MemoryBackend::new());
        let catalog = Catalog::new(Arc::new(MemoryKv::new()));
        let mut builder = ResourceBuilder::new(config());
        let (h1, b1) = body(1, 100);
        let (h2, b2) = body(2, 50);
        builder.append(h1, b1.clone());
        builder.append(h2, b2.clone());
        let record = builder.seal(&client, &catalog).await.unwrap();

        assert!(builder.is_empty());
        let fragment = catalog.get_fragment(&h1).await.unwrap().unwrap();
        assert_eq!(fragment.resource.resource_id, record.resource_id);
        assert_eq!(fragment.size, 100);
        assert_eq!(fragment.refcount, 0);

        // The stored blob reproduces both bodies at the recorded offsets.
        let raw = client.get(&record.backend_key).await.unwrap();
        let payload = record.encapsulation.compressor.decompress(&raw).unwrap();
        let f2 = catalog.get_fragment(&h2).await.unwrap().unwrap();
        let slice = &payload
            [f2.resource.offset as usize..(f2.resource.offset + f2.resource.length) as usize];
        assert_eq!(slice, b2.as_ref());
    }

    #[tokio::test]
    async fn test_failed_upload_commits_nothing() {
        let client = StorageClient::new(MemoryBackend::new().with_acceptor(|_| false));
        let catalog = Catalog::new(Arc::new(MemoryKv::new()));
        let mut builder = ResourceBuilder::new(config());
        let (h, b) = body(9, 64);
        builder.append(h, b);
        let err = builder.seal(&client, &catalog).await.unwrap_err();
        assert!(matches!(err, SaverError::BackendRejected(_)));
        assert!(catalog.get_fragment(&h).await.unwrap().is_none());
        assert!(catalog.list_resources().await.unwrap().is_empty());
        // Bodies are still recoverable for the retry path.
        assert_eq!(builder.into_frames().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_resource_rejected_before_upload() {
        let backend = MemoryBackend::new().with_max_resource_size(128);
        let client = StorageClient::new(backend.clone());
        let catalog = Catalog::new(Arc::new(MemoryKv::new()));
        let mut builder = ResourceBuilder::new(AssemblerConfig {
            target_payload_size: u64::MAX,
            max_fragments: u32::MAX,
            encapsulation: Encapsulation::default(),
        });
        let (h, b) = body(3, 200);
        builder.append(h, b);
        let err = builder.seal(&client, &catalog).await.unwrap_err();
        assert!(matches!(err, SaverError::BackendRejected(_)));
        assert_eq!(backend.blob_count().await, 0);
    }
}
