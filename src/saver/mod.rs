//! Compound manager: the named-stream layer tying the fragment pipeline,
//! the assembler, the caches and the catalog together.

pub mod stats;

pub use stats::Statistics;

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{StorageBackend, StorageClient};
use crate::catalog::{Catalog, CompoundRecord, ContentHash};
use crate::codec::{Compressor, Encapsulation, Wrapper};
use crate::error::SaverError;
use crate::fragment::pipeline::read_chunk;
use crate::fragment::{FragmentPipeline, PendingFragments};
use crate::resource::{AssemblerConfig, ResourceBuilder, ResourceCache};

#[derive(Debug, Clone)]
pub struct SaverConfig {
    /// Chunk size for new compounds; dedup only works between compounds
    /// ingested with the same value.
    pub fragment_size: u64,
    /// Inner payload bytes per resource before it seals.
    pub target_resource_size: u64,
    /// Fragment count per resource before it seals.
    pub max_fragments_per_resource: u32,
    /// First-layer encapsulation applied to every fragment.
    pub compound_encapsulation: Encapsulation,
    /// Second-layer compressor around the assembled payload. Identity by
    /// default: fragment bodies are already compressed.
    pub resource_compressor: Compressor,
    /// Override the wrapper the backend asks for (testing/forcing only).
    pub resource_wrapper: Option<Wrapper>,
    /// Resource cache capacity in bytes.
    pub cache_capacity: u64,
    /// `clean --defragment` rewrites compounds spanning more than this many
    /// resources.
    pub defragment_fanout: u32,
}

impl Default for SaverConfig {
    fn default() -> Self {
        Self {
            fragment_size: 1_000_000,
            target_resource_size: 25_000_000,
            max_fragments_per_resource: 1024,
            compound_encapsulation: Encapsulation::new(Compressor::Zlib, Wrapper::Identity),
            resource_compressor: Compressor::Identity,
            resource_wrapper: None,
            cache_capacity: 128_000_000,
            defragment_fanout: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UploadOptions {
    /// Replace an existing compound of the same name.
    pub overwrite: bool,
    /// Per-upload fragment size override.
    pub fragment_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub resources_deleted: u64,
    pub fragments_deleted: u64,
    pub compounds_repacked: u64,
}

/// Catalog references that failed to resolve; empty means the store honors
/// referential closure and every resource blob is present.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    /// (compound name, fragment hash) pairs with no fragment record.
    pub missing_fragments: Vec<(String, ContentHash)>,
    /// Fragment hashes whose resource record is gone.
    pub missing_resources: Vec<ContentHash>,
    /// Resource ids whose backend blob is gone.
    pub missing_blobs: Vec<Uuid>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_fragments.is_empty()
            && self.missing_resources.is_empty()
            && self.missing_blobs.is_empty()
    }
}

pub struct Saver<B> {
    client: StorageClient<B>,
    catalog: Catalog,
    config: SaverConfig,
    cache: ResourceCache,
    resource_encapsulation: Encapsulation,
}

impl<B: StorageBackend> Saver<B> {
    pub fn new(backend: B, catalog: Catalog, mut config: SaverConfig) -> Self {
        let backend_limit = backend.max_resource_size();
        if config.target_resource_size > backend_limit {
            warn!(
                requested = config.target_resource_size,
                backend_limit, "target resource size exceeds the backend blob limit; clamping"
            );
            config.target_resource_size = backend_limit;
        }
        let wrapper = config.resource_wrapper.unwrap_or(backend.required_wrapper());
        let resource_encapsulation = Encapsulation::new(config.resource_compressor, wrapper);
        let cache = ResourceCache::new(config.cache_capacity);
        Self {
            client: StorageClient::new(backend),
            catalog,
            config,
            cache,
            resource_encapsulation,
        }
    }

    pub fn config(&self) -> &SaverConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn client(&self) -> &StorageClient<B> {
        &self.client
    }

    fn assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig {
            target_payload_size: self.config.target_resource_size,
            max_fragments: self.config.max_fragments_per_resource,
            encapsulation: self.resource_encapsulation,
        }
    }

    // ---- upload ----

    /// Ingest a stream under `name`. On success the compound is committed
    /// atomically; on failure no compound exists, and any resources sealed
    /// along the way stay behind as garbage-collection candidates.
    pub async fn upload<R>(
        &mut self,
        name: &str,
        reader: &mut R,
        options: UploadOptions,
    ) -> Result<CompoundRecord, SaverError>
    where
        R: AsyncRead + Unpin,
    {
        if name.is_empty() {
            return Err(SaverError::Usage("compound name must not be empty".into()));
        }
        let fragment_size = options.fragment_size.unwrap_or(self.config.fragment_size);
        if fragment_size == 0 {
            return Err(SaverError::Usage("fragment size must be positive".into()));
        }
        let previous = self.catalog.get_compound(name).await?;
        if previous.is_some() && !options.overwrite {
            return Err(SaverError::CompoundExists(name.to_string()));
        }

        let pipeline = FragmentPipeline::new(self.config.compound_encapsulation);
        let mut pending = PendingFragments::new(
            self.config.target_resource_size,
            self.config.max_fragments_per_resource,
        );
        let mut sequence = Vec::new();
        let mut hasher = Sha256::new();
        let mut total_size = 0u64;

        while let Some(chunk) = read_chunk(reader, fragment_size as usize).await? {
            hasher.update(&chunk);
            total_size += chunk.len() as u64;
            let (hash, body) = pipeline.encode_chunk(&chunk)?;
            sequence.push(hash);
            if !pending.contains(&hash) && !self.catalog.has_fragment(&hash).await? {
                pending.push(hash, body);
            }
            self.drain_pending(&mut pending, false).await?;
        }
        self.drain_pending(&mut pending, true).await?;

        let record = CompoundRecord {
            name: name.to_string(),
            size: total_size,
            hash: ContentHash::from_digest(hasher),
            encapsulation: self.config.compound_encapsulation,
            fragment_size,
            sequence,
        };
        self.catalog
            .commit_compound(&record, previous.as_ref())
            .await?;
        info!(
            name,
            size = record.size,
            fragments = record.sequence.len(),
            "uploaded compound"
        );
        Ok(record)
    }

    /// Seal resources out of the pending buffer. Without `force` only
    /// threshold-filled prefixes are drained; with `force` everything goes.
    async fn drain_pending(
        &mut self,
        pending: &mut PendingFragments,
        force: bool,
    ) -> Result<(), SaverError> {
        while if force { !pending.is_empty() } else { pending.should_flush() } {
            let mut builder = ResourceBuilder::new(self.assembler_config());
            while !builder.is_full() {
                let Some((hash, body)) = pending.pop() else {
                    break;
                };
                builder.append(hash, body);
            }
            if builder.is_empty() {
                break;
            }
            if let Err(e) = builder.seal(&self.client, &self.catalog).await {
                pending.requeue_front(builder.into_frames());
                return Err(e);
            }
        }
        Ok(())
    }

    // ---- download ----

    /// Reassemble a compound into `writer`, verifying every fragment and
    /// the total stream hash.
    pub async fn download<W>(
        &mut self,
        name: &str,
        writer: &mut W,
    ) -> Result<CompoundRecord, SaverError>
    where
        W: AsyncWrite + Unpin,
    {
        let compound = self
            .catalog
            .get_compound(name)
            .await?
            .ok_or_else(|| SaverError::CompoundNotFound(name.to_string()))?;
        let pipeline = FragmentPipeline::new(compound.encapsulation);
        let mut hasher = Sha256::new();
        let mut written = 0u64;

        for hash in &compound.sequence {
            let fragment = self.catalog.get_fragment(hash).await?.ok_or_else(|| {
                SaverError::CatalogCorrupt(format!(
                    "compound {name} references missing fragment {hash}"
                ))
            })?;
            let resource_id = fragment.resource.resource_id;
            let payload = self.fetch_payload(&resource_id).await?;
            let start = fragment.resource.offset as usize;
            let end = start + fragment.resource.length as usize;
            let body = payload.get(start..end).ok_or_else(|| {
                SaverError::resource_corrupt(resource_id, "fragment range outside the payload")
            })?;
            if ContentHash::of(body) != *hash {
                return Err(SaverError::resource_corrupt(
                    resource_id,
                    format!("fragment {hash} does not match its content address"),
                ));
            }
            let chunk = pipeline.decode_body(body).map_err(|e| {
                SaverError::resource_corrupt(resource_id, format!("fragment decode failed: {e}"))
            })?;
            hasher.update(&chunk);
            written += chunk.len() as u64;
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;

        if written != compound.size || ContentHash::from_digest(hasher) != compound.hash {
            return Err(SaverError::CompoundCorrupt {
                name: name.to_string(),
                reason: "reassembled stream does not match the recorded size/hash".into(),
            });
        }
        Ok(compound)
    }

    /// Convenience wrapper collecting a download into memory.
    pub async fn load(&mut self, name: &str) -> Result<Vec<u8>, SaverError> {
        let mut buf = std::io::Cursor::new(Vec::new());
        self.download(name, &mut buf).await?;
        Ok(buf.into_inner())
    }

    /// Fetch a resource's decoded inner payload, through the cache.
    async fn fetch_payload(&mut self, resource_id: &Uuid) -> Result<Arc<Vec<u8>>, SaverError> {
        if let Some(payload) = self.cache.get(resource_id) {
            return Ok(payload);
        }
        let resource = self.catalog.get_resource(resource_id).await?.ok_or_else(|| {
            SaverError::CatalogCorrupt(format!("fragment references missing resource {resource_id}"))
        })?;
        let raw = match self.client.get(&resource.backend_key).await {
            Ok(raw) => raw,
            Err(crate::backend::BackendError::NotFound(_)) => {
                return Err(SaverError::resource_corrupt(
                    *resource_id,
                    "blob is missing on the backend",
                ))
            }
            Err(e) => return Err(e.into()),
        };
        if raw.len() as u64 != resource.stored_size {
            return Err(SaverError::resource_corrupt(
                *resource_id,
                format!(
                    "stored size changed: recorded {}, got {}",
                    resource.stored_size,
                    raw.len()
                ),
            ));
        }
        let payload = resource
            .encapsulation
            .strip(&raw)
            .map_err(|e| SaverError::resource_corrupt(*resource_id, e.to_string()))?;
        crate::resource::format::check_header(
            &payload,
            &resource.encapsulation,
            resource.fragment_count,
        )
        .map_err(|e| SaverError::resource_corrupt(*resource_id, e.to_string()))?;
        if payload.len() as u64 != resource.payload_size {
            return Err(SaverError::resource_corrupt(
                *resource_id,
                "payload size does not match the catalog",
            ));
        }
        let payload = Arc::new(payload);
        self.cache.insert(*resource_id, payload.clone());
        Ok(payload)
    }

    // ---- naming operations ----

    pub async fn list(&self) -> Result<Vec<CompoundRecord>, SaverError> {
        Ok(self.catalog.list_compounds().await?)
    }

    pub async fn stat(&self, name: &str) -> Result<Option<CompoundRecord>, SaverError> {
        Ok(self.catalog.get_compound(name).await?)
    }

    pub async fn exists(&self, name: &str) -> Result<bool, SaverError> {
        Ok(self.catalog.has_compound(name).await?)
    }

    /// Remove a compound. With `strict`, a missing name is an error;
    /// otherwise it is a no-op (returns whether anything was removed).
    pub async fn delete(&mut self, name: &str, strict: bool) -> Result<bool, SaverError> {
        match self.catalog.delete_compound(name).await? {
            Some(_) => {
                info!(name, "deleted compound");
                Ok(true)
            }
            None if strict => Err(SaverError::CompoundNotFound(name.to_string())),
            None => Ok(false),
        }
    }

    pub async fn rename(&mut self, old: &str, new: &str) -> Result<(), SaverError> {
        if new.is_empty() {
            return Err(SaverError::Usage("new name must not be empty".into()));
        }
        let record = self
            .catalog
            .get_compound(old)
            .await?
            .ok_or_else(|| SaverError::CompoundNotFound(old.to_string()))?;
        if self.catalog.has_compound(new).await? {
            return Err(SaverError::CompoundExists(new.to_string()));
        }
        let renamed = CompoundRecord {
            name: new.to_string(),
            ..record.clone()
        };
        self.catalog.commit_compound(&renamed, Some(&record)).await?;
        Ok(())
    }

    /// Duplicate a compound under a new name; the copy shares every
    /// fragment, so only catalog refcounts change.
    pub async fn copy(&mut self, src: &str, dst: &str, overwrite: bool) -> Result<(), SaverError> {
        let record = self
            .catalog
            .get_compound(src)
            .await?
            .ok_or_else(|| SaverError::CompoundNotFound(src.to_string()))?;
        let previous = self.catalog.get_compound(dst).await?;
        if previous.is_some() && !overwrite {
            return Err(SaverError::CompoundExists(dst.to_string()));
        }
        let copy = CompoundRecord {
            name: dst.to_string(),
            ..record
        };
        self.catalog.commit_compound(&copy, previous.as_ref()).await?;
        Ok(())
    }

    // ---- maintenance ----

    pub async fn statistic(&self) -> Result<Statistics, SaverError> {
        let compounds = self.catalog.list_compounds().await?;
        let fragments = self.catalog.list_fragments().await?;
        let resources = self.catalog.list_resources().await?;

        let fragment_sizes: std::collections::HashMap<ContentHash, u64> =
            fragments.iter().map(|f| (f.hash, f.size)).collect();
        let referenced_fragment_size = compounds
            .iter()
            .flat_map(|c| c.sequence.iter())
            .map(|h| fragment_sizes.get(h).copied().unwrap_or(0))
            .sum::<u64>();
        let fragment_total_size = fragments.iter().map(|f| f.size).sum::<u64>();
        let live_fragment_size = fragments
            .iter()
            .filter(|f| f.refcount > 0)
            .map(|f| f.size)
            .sum::<u64>();
        let resource_payload_size = resources.iter().map(|r| r.payload_size).sum::<u64>();

        Ok(Statistics {
            compound_count: compounds.len() as u64,
            compound_total_size: compounds.iter().map(|c| c.size).sum(),
            fragment_count: fragments.len() as u64,
            fragment_total_size,
            referenced_fragment_size,
            resource_count: resources.len() as u64,
            resource_stored_size: resources.iter().map(|r| r.stored_size).sum(),
            resource_payload_size,
            dedup_ratio: if fragment_total_size == 0 {
                1.0
            } else {
                referenced_fragment_size as f64 / fragment_total_size as f64
            },
            fill_efficiency: if resource_payload_size == 0 {
                1.0
            } else {
                live_fragment_size as f64 / resource_payload_size as f64
            },
        })
    }

    /// Garbage-collect resources none of whose fragments are referenced.
    /// With `defragment`, first rewrite compounds spanning too many
    /// resources so their stale copies become collectable.
    pub async fn clean(&mut self, defragment: bool) -> Result<CleanReport, SaverError> {
        let mut report = CleanReport::default();
        if defragment {
            report.compounds_repacked = self.defragment().await?;
        }
        for (resource, hashes) in self.catalog.dead_resources().await? {
            self.client.delete(&resource.backend_key).await?;
            self.catalog.delete_resource(&resource, &hashes).await?;
            self.cache.invalidate(&resource.resource_id);
            report.resources_deleted += 1;
            report.fragments_deleted += hashes.len() as u64;
        }
        info!(
            resources = report.resources_deleted,
            fragments = report.fragments_deleted,
            repacked = report.compounds_repacked,
            "clean finished"
        );
        Ok(report)
    }

    /// Re-pack the fragments of wide-spanning compounds into fresh, dense
    /// resources. The stale originals lose their reverse-index entries and
    /// fall to the next dead-resource sweep.
    async fn defragment(&mut self) -> Result<u64, SaverError> {
        let mut repacked = 0u64;
        for compound in self.catalog.list_compounds().await? {
            let mut spanned = HashSet::new();
            for hash in &compound.sequence {
                let fragment = self.catalog.get_fragment(hash).await?.ok_or_else(|| {
                    SaverError::CatalogCorrupt(format!(
                        "compound {} references missing fragment {hash}",
                        compound.name
                    ))
                })?;
                spanned.insert(fragment.resource.resource_id);
            }
            if spanned.len() as u32 <= self.config.defragment_fanout {
                continue;
            }
            info!(
                compound = %compound.name,
                resources = spanned.len(),
                "defragmenting wide-spanning compound"
            );

            let mut seen = HashSet::new();
            let mut builder = ResourceBuilder::new(self.assembler_config());
            for hash in &compound.sequence {
                if !seen.insert(*hash) {
                    continue;
                }
                let fragment = self.catalog.get_fragment(hash).await?.ok_or_else(|| {
                    SaverError::CatalogCorrupt(format!("missing fragment {hash}"))
                })?;
                let payload = self.fetch_payload(&fragment.resource.resource_id).await?;
                let start = fragment.resource.offset as usize;
                let end = start + fragment.resource.length as usize;
                let body = payload.get(start..end).ok_or_else(|| {
                    SaverError::resource_corrupt(
                        fragment.resource.resource_id,
                        "fragment range outside the payload",
                    )
                })?;
                builder.append(*hash, Bytes::copy_from_slice(body));
                if builder.is_full() {
                    builder.seal(&self.client, &self.catalog).await?;
                }
            }
            if !builder.is_empty() {
                builder.seal(&self.client, &self.catalog).await?;
            }
            repacked += 1;
        }
        Ok(repacked)
    }

    /// Verify referential closure and blob presence.
    pub async fn check_consistency(&self) -> Result<ConsistencyReport, SaverError> {
        let mut report = ConsistencyReport::default();
        let backend_keys: HashSet<String> = self.client.list().await?.into_iter().collect();

        for compound in self.catalog.list_compounds().await? {
            for hash in &compound.sequence {
                if self.catalog.get_fragment(hash).await?.is_none() {
                    report.missing_fragments.push((compound.name.clone(), *hash));
                }
            }
        }
        for fragment in self.catalog.list_fragments().await? {
            if self
                .catalog
                .get_resource(&fragment.resource.resource_id)
                .await?
                .is_none()
            {
                report.missing_resources.push(fragment.hash);
            }
        }
        for resource in self.catalog.list_resources().await? {
            if !backend_keys.contains(&resource.backend_key) {
                report.missing_blobs.push(resource.resource_id);
            }
        }
        Ok(report)
    }

    /// Drop the catalog; with `with_backend` also delete every stored blob
    /// first.
    pub async fn wipe(&mut self, with_backend: bool) -> Result<(), SaverError> {
        if with_backend {
            for key in self.client.list().await? {
                self.client.delete(&key).await?;
            }
        }
        self.catalog.wipe().await?;
        self.cache.clear();
        info!(with_backend, "wiped catalog");
        Ok(())
    }
}
