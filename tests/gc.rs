//! Dedup accounting, refcounts, garbage collection and defragmentation.

use std::sync::Arc;

use pixvault::backend::memory::MemoryBackend;
use pixvault::catalog::kv::MemoryKv;
use pixvault::catalog::Catalog;
use pixvault::{Saver, SaverConfig, UploadOptions};

fn config() -> SaverConfig {
    SaverConfig {
        fragment_size: 16,
        target_resource_size: 64,
        max_fragments_per_resource: 4,
        ..Default::default()
    }
}

fn saver_with(
    backend: MemoryBackend,
    catalog: Catalog,
    config: SaverConfig,
) -> Saver<MemoryBackend> {
    Saver::new(backend, catalog, config)
}

fn bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

#[tokio::test]
async fn test_second_identical_upload_creates_no_fragments() {
    let backend = MemoryBackend::new();
    let catalog = Catalog::new(Arc::new(MemoryKv::new()));
    let mut saver = saver_with(backend.clone(), catalog.clone(), config());

    let data = bytes(8 * 16, 21);
    let mut reader = data.as_slice();
    saver.upload("one", &mut reader, UploadOptions::default()).await.unwrap();
    let fragments_before = catalog.list_fragments().await.unwrap().len();
    let blobs_before = backend.blob_count().await;

    let mut reader = data.as_slice();
    saver.upload("two", &mut reader, UploadOptions::default()).await.unwrap();

    assert_eq!(catalog.list_fragments().await.unwrap().len(), fragments_before);
    assert_eq!(backend.blob_count().await, blobs_before, "no new blobs for shared bytes");

    let stats = saver.statistic().await.unwrap();
    assert_eq!(stats.compound_count, 2);
    assert!((stats.dedup_ratio - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_repeated_chunks_dedup_within_one_compound() {
    let backend = MemoryBackend::new();
    let catalog = Catalog::new(Arc::new(MemoryKv::new()));
    let mut saver = saver_with(backend, catalog.clone(), config());

    // Eight identical chunks -> one unique fragment referenced eight times.
    let data = [7u8; 16].repeat(8);
    let mut reader = data.as_slice();
    let record = saver.upload("loop", &mut reader, UploadOptions::default()).await.unwrap();
    assert_eq!(record.sequence.len(), 8);
    assert_eq!(catalog.list_fragments().await.unwrap().len(), 1);
    let fragment = catalog.get_fragment(&record.sequence[0]).await.unwrap().unwrap();
    assert_eq!(fragment.refcount, 8);
    assert_eq!(saver.load("loop").await.unwrap(), data);
}

#[tokio::test]
async fn test_refcounts_and_gc_closure_across_deletes() {
    let backend = MemoryBackend::new();
    let catalog = Catalog::new(Arc::new(MemoryKv::new()));
    let mut saver = saver_with(backend.clone(), catalog.clone(), config());

    let shared = bytes(6 * 16, 30);
    let mut reader = shared.as_slice();
    saver.upload("a", &mut reader, UploadOptions::default()).await.unwrap();
    let mut reader = shared.as_slice();
    saver.upload("b", &mut reader, UploadOptions::default()).await.unwrap();

    // Both compounds pin the same fragments; deleting one frees nothing.
    saver.delete("a", true).await.unwrap();
    let report = saver.clean(false).await.unwrap();
    assert_eq!(report.resources_deleted, 0);
    assert_eq!(saver.load("b").await.unwrap(), shared);

    // After the last reference goes, everything is collectable.
    saver.delete("b", true).await.unwrap();
    let report = saver.clean(false).await.unwrap();
    assert!(report.resources_deleted > 0);
    assert!(catalog.list_fragments().await.unwrap().is_empty());
    assert!(catalog.list_resources().await.unwrap().is_empty());
    assert_eq!(backend.blob_count().await, 0, "backend blobs deleted with their resources");
}

#[tokio::test]
async fn test_failed_upload_leaves_orphans_for_clean() {
    let backend = MemoryBackend::new();
    let catalog = Catalog::new(Arc::new(MemoryKv::new()));
    let mut saver = saver_with(backend.clone(), catalog.clone(), config());

    // A reader that yields enough for a few sealed resources, then fails.
    struct FailingReader {
        remaining: usize,
    }
    impl tokio::io::AsyncRead for FailingReader {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            if self.remaining == 0 {
                return std::task::Poll::Ready(Err(std::io::Error::other("stream interrupted")));
            }
            let n = self.remaining.min(buf.remaining()).min(16);
            // Distinct per chunk so every fragment is new.
            buf.put_slice(&vec![(self.remaining % 251) as u8; n]);
            self.remaining -= n;
            std::task::Poll::Ready(Ok(()))
        }
    }

    let mut reader = FailingReader { remaining: 12 * 16 };
    // Several resources seal while the stream flows; then the read fails
    // and the compound never commits.
    let err = saver.upload("broken", &mut reader, UploadOptions::default()).await.unwrap_err();
    assert!(matches!(err, pixvault::SaverError::Io(_)));
    assert!(!saver.exists("broken").await.unwrap());
    assert!(backend.blob_count().await > 0, "orphan resources were uploaded");

    // Whatever sealed before the failure is unreferenced, so clean sweeps it.
    saver.clean(false).await.unwrap();
    assert!(catalog.list_resources().await.unwrap().is_empty());
    assert_eq!(backend.blob_count().await, 0);
}

#[tokio::test]
async fn test_delete_missing_name_modes() {
    let backend = MemoryBackend::new();
    let catalog = Catalog::new(Arc::new(MemoryKv::new()));
    let mut saver = saver_with(backend, catalog, config());
    // Update mode: no-op. Strict mode: usage error.
    assert!(!saver.delete("ghost", false).await.unwrap());
    let err = saver.delete("ghost", true).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_defragment_reduces_fanout() {
    let backend = MemoryBackend::new();
    let catalog = Catalog::new(Arc::new(MemoryKv::new()));

    // Tiny resources: every fragment lands in its own blob.
    let scatter = SaverConfig {
        fragment_size: 16,
        target_resource_size: 1,
        max_fragments_per_resource: 1,
        ..Default::default()
    };
    let data = bytes(6 * 16, 40);
    let mut saver = saver_with(backend.clone(), catalog.clone(), scatter);
    let mut reader = data.as_slice();
    let record = saver.upload("wide", &mut reader, UploadOptions::default()).await.unwrap();
    assert_eq!(catalog.list_resources().await.unwrap().len(), 6);

    // Repack through a dense config sharing the same catalog and backend.
    let dense = SaverConfig {
        fragment_size: 16,
        target_resource_size: 10_000,
        max_fragments_per_resource: 100,
        defragment_fanout: 1,
        ..Default::default()
    };
    let mut saver = saver_with(backend.clone(), catalog.clone(), dense);
    let report = saver.clean(true).await.unwrap();
    assert_eq!(report.compounds_repacked, 1);
    assert!(report.resources_deleted >= 6, "stale single-fragment resources swept");

    // The compound now reads from a single resource, byte-exact.
    let mut spanned = std::collections::HashSet::new();
    for hash in &record.sequence {
        let fragment = catalog.get_fragment(hash).await.unwrap().unwrap();
        spanned.insert(fragment.resource.resource_id);
    }
    assert_eq!(spanned.len(), 1);
    assert_eq!(saver.load("wide").await.unwrap(), data);
}

#[tokio::test]
async fn test_wipe_with_backend() {
    let backend = MemoryBackend::new();
    let catalog = Catalog::new(Arc::new(MemoryKv::new()));
    let mut saver = saver_with(backend.clone(), catalog.clone(), config());
    let data = bytes(100, 50);
    let mut reader = data.as_slice();
    saver.upload("gone soon", &mut reader, UploadOptions::default()).await.unwrap();
    assert!(backend.blob_count().await > 0);

    saver.wipe(true).await.unwrap();
    assert!(catalog.list_compounds().await.unwrap().is_empty());
    assert!(catalog.list_fragments().await.unwrap().is_empty());
    assert_eq!(backend.blob_count().await, 0);

    let stats = saver.statistic().await.unwrap();
    assert_eq!(stats.compound_count, 0);
    assert!((stats.dedup_ratio - 1.0).abs() < 1e-9);
}
