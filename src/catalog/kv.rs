//! Key/value substrate for the catalog.
//!
//! A [`WriteBatch`] is the transaction: build it up (begin), drop it
//! (rollback) or hand it to [`KvStore::commit`] which applies every
//! operation atomically. [`FileKv`] persists the whole map as a versioned
//! JSON snapshot via write-to-temp + fsync + rename, so a crash leaves
//! either the old snapshot or the new one, never a torn file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::CatalogError;

const SNAPSHOT_MAGIC: &str = "PIXVAULT";

/// Bump major for incompatible snapshot changes; readers refuse newer
/// majors and accept any minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

pub const SCHEMA_VERSION: SchemaVersion = SchemaVersion { major: 1, minor: 0 };

#[derive(Debug, Clone)]
enum BatchOp {
    Put(String, Value),
    Delete(String),
}

/// Staged multi-key mutation; applied all-or-nothing by `commit`.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<(), CatalogError> {
        let value = serde_json::to_value(value)?;
        self.ops.push(BatchOp::Put(key.into(), value));
        Ok(())
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    fn apply(self, map: &mut BTreeMap<String, Value>) {
        for op in self.ops {
            match op {
                BatchOp::Put(key, value) => {
                    map.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CatalogError>;

    /// All entries whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, CatalogError>;

    /// Apply a batch atomically and durably.
    async fn commit(&self, batch: WriteBatch) -> Result<(), CatalogError>;

    /// Drop every entry (wipe).
    async fn clear(&self) -> Result<(), CatalogError>;
}

fn scan_map(map: &BTreeMap<String, Value>, prefix: &str) -> Vec<(String, Value)> {
    map.range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Catalog store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<String, Value>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Value>, CatalogError> {
        Ok(self.map.read().await.get(key).cloned())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, CatalogError> {
        Ok(scan_map(&*self.map.read().await, prefix))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), CatalogError> {
        batch.apply(&mut *self.map.write().await);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CatalogError> {
        self.map.write().await.clear();
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    magic: String,
    version: SchemaVersion,
    entries: BTreeMap<String, Value>,
}

/// Durable catalog store: one snapshot file, rewritten atomically on every
/// commit. Metadata volume is tiny next to the payloads it describes, so a
/// full rewrite per logical operation is a good trade for crash safety.
pub struct FileKv {
    path: PathBuf,
    map: RwLock<BTreeMap<String, Value>>,
}

impl FileKv {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();
        let map = match tokio::fs::read(&path).await {
            Ok(raw) => {
                let snapshot: Snapshot = serde_json::from_slice(&raw)
                    .map_err(|e| CatalogError::Corrupt(format!("unreadable snapshot: {e}")))?;
                if snapshot.magic != SNAPSHOT_MAGIC {
                    return Err(CatalogError::Corrupt("snapshot magic mismatch".into()));
                }
                if snapshot.version.major > SCHEMA_VERSION.major {
                    return Err(CatalogError::Corrupt(format!(
                        "snapshot version {}.{} is newer than supported {}.{}",
                        snapshot.version.major,
                        snapshot.version.minor,
                        SCHEMA_VERSION.major,
                        SCHEMA_VERSION.minor
                    )));
                }
                snapshot.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            map: RwLock::new(map),
        })
    }

    async fn persist(&self, entries: &BTreeMap<String, Value>) -> Result<(), CatalogError> {
        let snapshot = Snapshot {
            magic: SNAPSHOT_MAGIC.to_string(),
            version: SCHEMA_VERSION,
            entries: entries.clone(),
        };
        let raw = serde_json::to_vec(&snapshot)?;
        let tmp = self.path.with_extension("tmp");
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&raw).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKv {
    async fn get(&self, key: &str) -> Result<Option<Value>, CatalogError> {
        Ok(self.map.read().await.get(key).cloned())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, CatalogError> {
        Ok(scan_map(&*self.map.read().await, prefix))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), CatalogError> {
        let mut guard = self.map.write().await;
        // Stage on a copy so a failed persist leaves memory matching disk.
        let mut staged = guard.clone();
        batch.apply(&mut staged);
        self.persist(&staged).await?;
        *guard = staged;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CatalogError> {
        let mut guard = self.map.write().await;
        let staged = BTreeMap::new();
        self.persist(&staged).await?;
        *guard = staged;
        Ok(())
    }
}
