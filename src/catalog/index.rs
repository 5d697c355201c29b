//! Typed catalog over the key/value substrate.
//!
//! Key space:
//! - `compound/<name>`            -> [`CompoundRecord`]
//! - `fragment/<hash hex>`        -> [`FragmentRecord`]
//! - `resource/<uuid>`            -> [`ResourceRecord`]
//! - `rmap/<uuid>/<hash hex>`     -> () reverse index for garbage collection
//!
//! Refcounts change only inside compound commit/delete batches, so they are
//! always consistent with the set of committed sequences.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::kv::{KvStore, WriteBatch};
use super::{
    CatalogError, CompoundRecord, ContentHash, FragmentPlacement, FragmentRecord, ResourceRecord,
    ResourceRef,
};

fn compound_key(name: &str) -> String {
    format!("compound/{name}")
}

fn fragment_key(hash: &ContentHash) -> String {
    format!("fragment/{}", hash.to_hex())
}

fn resource_key(id: &Uuid) -> String {
    format!("resource/{id}")
}

fn rmap_key(id: &Uuid, hash: &ContentHash) -> String {
    format!("rmap/{id}/{}", hash.to_hex())
}

#[derive(Clone)]
pub struct Catalog {
    kv: Arc<dyn KvStore>,
}

impl Catalog {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CatalogError> {
        match self.kv.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn scan_typed<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, CatalogError> {
        self.kv
            .scan_prefix(prefix)
            .await?
            .into_iter()
            .map(|(_, value)| serde_json::from_value(value).map_err(CatalogError::from))
            .collect()
    }

    // ---- compounds ----

    pub async fn get_compound(&self, name: &str) -> Result<Option<CompoundRecord>, CatalogError> {
        self.get_typed(&compound_key(name)).await
    }

    pub async fn has_compound(&self, name: &str) -> Result<bool, CatalogError> {
        Ok(self.kv.get(&compound_key(name)).await?.is_some())
    }

    pub async fn list_compounds(&self) -> Result<Vec<CompoundRecord>, CatalogError> {
        self.scan_typed("compound/").await
    }

    /// Commit (or replace) a compound and settle the refcount deltas between
    /// its sequence and the sequence it replaces, all in one batch.
    pub async fn commit_compound(
        &self,
        record: &CompoundRecord,
        replaces: Option<&CompoundRecord>,
    ) -> Result<(), CatalogError> {
        let mut deltas: HashMap<ContentHash, i64> = HashMap::new();
        for hash in &record.sequence {
            *deltas.entry(*hash).or_insert(0) += 1;
        }
        if let Some(previous) = replaces {
            for hash in &previous.sequence {
                *deltas.entry(*hash).or_insert(0) -= 1;
            }
        }

        let mut batch = WriteBatch::new();
        batch.put(compound_key(&record.name), record)?;
        if let Some(previous) = replaces {
            if previous.name != record.name {
                batch.delete(compound_key(&previous.name));
            }
        }
        self.apply_refcount_deltas(&mut batch, deltas).await?;
        self.kv.commit(batch).await
    }

    /// Remove a compound and release its references. Returns the removed
    /// record, or `None` when the name is unknown.
    pub async fn delete_compound(&self, name: &str) -> Result<Option<CompoundRecord>, CatalogError> {
        let Some(record) = self.get_compound(name).await? else {
            return Ok(None);
        };
        let mut deltas: HashMap<ContentHash, i64> = HashMap::new();
        for hash in &record.sequence {
            *deltas.entry(*hash).or_insert(0) -= 1;
        }
        let mut batch = WriteBatch::new();
        batch.delete(compound_key(name));
        self.apply_refcount_deltas(&mut batch, deltas).await?;
        self.kv.commit(batch).await?;
        Ok(Some(record))
    }

    async fn apply_refcount_deltas(
        &self,
        batch: &mut WriteBatch,
        deltas: HashMap<ContentHash, i64>,
    ) -> Result<(), CatalogError> {
        for (hash, delta) in deltas {
            if delta == 0 {
                continue;
            }
            let key = fragment_key(&hash);
            let mut fragment: FragmentRecord =
                self.get_typed(&key)
                    .await?
                    .ok_or_else(|| CatalogError::Dangling {
                        kind: "fragment",
                        key: hash.to_hex(),
                    })?;
            let next = fragment.refcount as i64 + delta;
            if next < 0 {
                return Err(CatalogError::Corrupt(format!(
                    "refcount of fragment {} would drop below zero",
                    hash
                )));
            }
            fragment.refcount = next as u64;
            batch.put(key, &fragment)?;
        }
        Ok(())
    }

    // ---- fragments ----

    pub async fn get_fragment(
        &self,
        hash: &ContentHash,
    ) -> Result<Option<FragmentRecord>, CatalogError> {
        self.get_typed(&fragment_key(hash)).await
    }

    pub async fn has_fragment(&self, hash: &ContentHash) -> Result<bool, CatalogError> {
        Ok(self.kv.get(&fragment_key(hash)).await?.is_some())
    }

    pub async fn list_fragments(&self) -> Result<Vec<FragmentRecord>, CatalogError> {
        self.scan_typed("fragment/").await
    }

    // ---- resources ----

    pub async fn get_resource(&self, id: &Uuid) -> Result<Option<ResourceRecord>, CatalogError> {
        self.get_typed(&resource_key(id)).await
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceRecord>, CatalogError> {
        self.scan_typed("resource/").await
    }

    /// Hashes of every fragment whose body lives in the given resource.
    pub async fn fragments_of_resource(&self, id: &Uuid) -> Result<Vec<ContentHash>, CatalogError> {
        let prefix = format!("rmap/{id}/");
        self.kv
            .scan_prefix(&prefix)
            .await?
            .into_iter()
            .map(|(key, _)| ContentHash::from_hex(&key[prefix.len()..]))
            .collect()
    }

    /// Commit a freshly sealed resource together with every fragment it
    /// carries. Existing fragments (defragmentation re-homes them) keep
    /// their refcount and drop out of their old resource's reverse index.
    pub async fn commit_resource(
        &self,
        resource: &ResourceRecord,
        placements: &[FragmentPlacement],
    ) -> Result<(), CatalogError> {
        let mut batch = WriteBatch::new();
        batch.put(resource_key(&resource.resource_id), resource)?;
        for placement in placements {
            let existing = self.get_fragment(&placement.hash).await?;
            if let Some(previous) = &existing {
                if previous.resource.resource_id != resource.resource_id {
                    batch.delete(rmap_key(&previous.resource.resource_id, &placement.hash));
                }
            }
            let fragment = FragmentRecord {
                hash: placement.hash,
                size: placement.length,
                refcount: existing.map(|f| f.refcount).unwrap_or(0),
                resource: ResourceRef {
                    resource_id: resource.resource_id,
                    offset: placement.offset,
                    length: placement.length,
                },
            };
            batch.put(fragment_key(&placement.hash), &fragment)?;
            batch.put(rmap_key(&resource.resource_id, &placement.hash), &())?;
        }
        self.kv.commit(batch).await
    }

    /// Resources whose fragments are all unreferenced (or which carry none
    /// at all), together with those fragment hashes. These are the only
    /// resources garbage collection may touch.
    pub async fn dead_resources(
        &self,
    ) -> Result<Vec<(ResourceRecord, Vec<ContentHash>)>, CatalogError> {
        let mut dead = Vec::new();
        for resource in self.list_resources().await? {
            let hashes = self.fragments_of_resource(&resource.resource_id).await?;
            let mut live = false;
            for hash in &hashes {
                if let Some(fragment) = self.get_fragment(hash).await? {
                    // A fragment re-homed elsewhere does not pin this resource.
                    if fragment.refcount > 0
                        && fragment.resource.resource_id == resource.resource_id
                    {
                        live = true;
                        break;
                    }
                }
            }
            if !live {
                dead.push((resource, hashes));
            }
        }
        Ok(dead)
    }

    /// Drop a dead resource and the fragments it carried in one batch.
    pub async fn delete_resource(
        &self,
        resource: &ResourceRecord,
        hashes: &[ContentHash],
    ) -> Result<(), CatalogError> {
        let mut batch = WriteBatch::new();
        batch.delete(resource_key(&resource.resource_id));
        for hash in hashes {
            batch.delete(rmap_key(&resource.resource_id, hash));
            // Only drop the fragment row if this resource still hosts it.
            if let Some(fragment) = self.get_fragment(hash).await? {
                if fragment.resource.resource_id == resource.resource_id {
                    batch.delete(fragment_key(hash));
                }
            }
        }
        self.kv.commit(batch).await
    }

    /// Drop every record (the `wipe` operation).
    pub async fn wipe(&self) -> Result<(), CatalogError> {
        self.kv.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::kv::MemoryKv;
    use crate::codec::Encapsulation;

    fn catalog() -> Catalog {
        Catalog::new(Arc::new(MemoryKv::new()))
    }

    fn placement(body: &[u8], offset: u64) -> FragmentPlacement {
        FragmentPlacement {
            hash: ContentHash::of(body),
            offset,
            length: body.len() as u64,
        }
    }

    fn resource(id: Uuid) -> ResourceRecord {
        ResourceRecord {
            resource_id: id,
            backend_key: format!("key-{id}"),
            encapsulation: Encapsulation::default(),
            payload_size: 100,
            stored_size: 120,
            fragment_count: 2,
        }
    }

    fn compound(name: &str, sequence: Vec<ContentHash>) -> CompoundRecord {
        CompoundRecord {
            name: name.to_string(),
            size: 8,
            hash: ContentHash::of(b"stream"),
            encapsulation: Encapsulation::default(),
            fragment_size: 4,
            sequence,
        }
    }

    #[tokio::test]
    async fn test_refcounts_follow_commits_and_deletes() {
        let cat = catalog();
        let id = Uuid::new_v4();
        let a = placement(b"aaaa", 0);
        let b = placement(b"bbbb", 4);
        cat.commit_resource(&resource(id), &[a, b]).await.unwrap();
        assert_eq!(cat.get_fragment(&a.hash).await.unwrap().unwrap().refcount, 0);

        // One compound uses fragment a twice and b once.
        let c1 = compound("one", vec![a.hash, b.hash, a.hash]);
        cat.commit_compound(&c1, None).await.unwrap();
        assert_eq!(cat.get_fragment(&a.hash).await.unwrap().unwrap().refcount, 2);
        assert_eq!(cat.get_fragment(&b.hash).await.unwrap().unwrap().refcount, 1);

        // A second compound shares fragment b.
        let c2 = compound("two", vec![b.hash]);
        cat.commit_compound(&c2, None).await.unwrap();
        assert_eq!(cat.get_fragment(&b.hash).await.unwrap().unwrap().refcount, 2);

        cat.delete_compound("one").await.unwrap();
        assert_eq!(cat.get_fragment(&a.hash).await.unwrap().unwrap().refcount, 0);
        assert_eq!(cat.get_fragment(&b.hash).await.unwrap().unwrap().refcount, 1);
    }

    #[tokio::test]
    async fn test_replace_settles_old_sequence() {
        let cat = catalog();
        let id = Uuid::new_v4();
        let a = placement(b"aaaa", 0);
        let b = placement(b"bbbb", 4);
        cat.commit_resource(&resource(id), &[a, b]).await.unwrap();

        let v1 = compound("name", vec![a.hash]);
        cat.commit_compound(&v1, None).await.unwrap();
        let v2 = compound("name", vec![b.hash]);
        cat.commit_compound(&v2, Some(&v1)).await.unwrap();

        assert_eq!(cat.get_fragment(&a.hash).await.unwrap().unwrap().refcount, 0);
        assert_eq!(cat.get_fragment(&b.hash).await.unwrap().unwrap().refcount, 1);
        assert_eq!(cat.get_compound("name").await.unwrap().unwrap().sequence, vec![b.hash]);
    }

    #[tokio::test]
    async fn test_delete_missing_compound_is_none() {
        let cat = catalog();
        assert!(cat.delete_compound("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dead_resources_and_gc_closure() {
        let cat = catalog();
        let id = Uuid::new_v4();
        let a = placement(b"aaaa", 0);
        cat.commit_resource(&resource(id), &[a]).await.unwrap();

        // Unreferenced from the start: GC candidate.
        let dead = cat.dead_resources().await.unwrap();
        assert_eq!(dead.len(), 1);

        let c = compound("pin", vec![a.hash]);
        cat.commit_compound(&c, None).await.unwrap();
        assert!(cat.dead_resources().await.unwrap().is_empty());

        cat.delete_compound("pin").await.unwrap();
        let dead = cat.dead_resources().await.unwrap();
        assert_eq!(dead.len(), 1);
        let (resource, hashes) = &dead[0];
        cat.delete_resource(resource, hashes).await.unwrap();
        assert!(cat.list_resources().await.unwrap().is_empty());
        assert!(cat.list_fragments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rehome_updates_reverse_index() {
        let cat = catalog();
        let old_id = Uuid::new_v4();
        let new_id = Uuid::new_v4();
        let a = placement(b"aaaa", 0);
        cat.commit_resource(&resource(old_id), &[a]).await.unwrap();
        let c = compound("c", vec![a.hash]);
        cat.commit_compound(&c, None).await.unwrap();

        cat.commit_resource(&resource(new_id), &[a]).await.unwrap();
        assert!(cat.fragments_of_resource(&old_id).await.unwrap().is_empty());
        assert_eq!(cat.fragments_of_resource(&new_id).await.unwrap(), vec![a.hash]);
        // Old resource no longer pins anything even though refcount is 1.
        let dead = cat.dead_resources().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].0.resource_id, old_id);
        // Deleting it must not remove the re-homed fragment row.
        cat.delete_resource(&dead[0].0, &dead[0].1).await.unwrap();
        assert!(cat.get_fragment(&a.hash).await.unwrap().is_some());
    }
}
