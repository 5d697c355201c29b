//! Persistent metadata: compounds, fragments, resources and the mappings
//! between them.
//!
//! The catalog is the sole source of truth. Every logical mutation commits
//! as one atomic batch so a crash can never leave dangling references.

pub mod index;
pub mod kv;

pub use index::Catalog;
pub use kv::{FileKv, KvStore, MemoryKv, WriteBatch};

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::codec::Encapsulation;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog corrupt: {0}")]
    Corrupt(String),

    #[error("catalog io: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A reference did not resolve; with atomic commits this means the
    /// catalog no longer satisfies referential closure.
    #[error("dangling {kind} reference: {key}")]
    Dangling { kind: &'static str, key: String },
}

/// sha256 digest used as the content address of fragments and streams.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn from_digest(hasher: Sha256) -> Self {
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CatalogError> {
        let raw = hex::decode(s).map_err(|e| CatalogError::Corrupt(format!("bad hash hex: {e}")))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| CatalogError::Corrupt("hash is not 32 bytes".into()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A named byte stream: what the user uploads and downloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundRecord {
    pub name: String,
    /// Bytes of the original stream.
    pub size: u64,
    /// sha256 of the original stream; verified on download.
    pub hash: ContentHash,
    /// First-layer encapsulation applied to every fragment.
    pub encapsulation: Encapsulation,
    /// Chunk size this compound was ingested with.
    pub fragment_size: u64,
    /// Ordered fragment hashes; duplicates allowed; order defines
    /// reconstruction.
    pub sequence: Vec<ContentHash>,
}

/// Where a fragment body lives inside a resource's inner payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource_id: Uuid,
    pub offset: u64,
    pub length: u64,
}

/// A content-addressed, first-layer-encapsulated chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentRecord {
    pub hash: ContentHash,
    /// Bytes of the encapsulated body (equals `resource.length`).
    pub size: u64,
    /// Number of (compound, position) pairs referencing this fragment.
    /// Zero between resource seal and compound commit, or after deletes;
    /// such fragments are garbage-collection candidates.
    pub refcount: u64,
    pub resource: ResourceRef,
}

/// Final position of one fragment body inside a sealed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentPlacement {
    pub hash: ContentHash,
    pub offset: u64,
    pub length: u64,
}

/// A container of fragment bodies stored as one blob on the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource_id: Uuid,
    pub backend_key: String,
    /// Second-layer encapsulation (compressor + the wrapper the backend
    /// requires).
    pub encapsulation: Encapsulation,
    /// Bytes of the framed inner payload, pre-compression.
    pub payload_size: u64,
    /// Bytes actually stored on the backend, post-wrap.
    pub stored_size: u64,
    pub fragment_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_hex_round_trip() {
        let hash = ContentHash::of(b"some bytes");
        let parsed = ContentHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
        assert_eq!(hash.to_hex().len(), 64);
    }

    #[test]
    fn test_content_hash_serde_as_hex_string() {
        let hash = ContentHash::of(b"x");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        assert_eq!(serde_json::from_str::<ContentHash>(&json).unwrap(), hash);
    }

    #[test]
    fn test_rejects_bad_hex() {
        assert!(ContentHash::from_hex("zz").is_err());
        assert!(ContentHash::from_hex("abcd").is_err());
    }
}
