//! Crate-wide error taxonomy, mapped to CLI exit codes.

use uuid::Uuid;

use crate::backend::BackendError;
use crate::catalog::CatalogError;
use crate::codec::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum SaverError {
    #[error("{0}")]
    Usage(String),

    #[error("compound already exists: {0} (pass overwrite to replace it)")]
    CompoundExists(String),

    #[error("no compound named {0}")]
    CompoundNotFound(String),

    /// Transient backend failure that survived the retry policy.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend rejected the request: {0}")]
    BackendRejected(String),

    /// The catalog is unusable; recovery requires `wipe`.
    #[error("catalog corrupt: {0}")]
    CatalogCorrupt(String),

    /// One stored blob failed its hash or length checks; compounds not
    /// touching it stay downloadable.
    #[error("resource {resource_id} corrupt: {reason}")]
    ResourceCorrupt { resource_id: Uuid, reason: String },

    /// The reassembled stream does not match the recorded stream hash.
    #[error("compound {name} corrupt: {reason}")]
    CompoundCorrupt { name: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    /// Wrap/compress failure on the ingest side.
    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SaverError {
    pub fn resource_corrupt(resource_id: Uuid, reason: impl Into<String>) -> Self {
        SaverError::ResourceCorrupt {
            resource_id,
            reason: reason.into(),
        }
    }

    /// Process exit code per the CLI contract: 0 ok, 1 generic, 2 usage,
    /// 3 backend unavailable, 4 catalog corruption, 5 integrity failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            SaverError::Usage(_)
            | SaverError::CompoundExists(_)
            | SaverError::CompoundNotFound(_) => 2,
            SaverError::BackendUnavailable(_) => 3,
            SaverError::CatalogCorrupt(_) => 4,
            SaverError::ResourceCorrupt { .. } | SaverError::CompoundCorrupt { .. } => 5,
            _ => 1,
        }
    }
}

impl From<BackendError> for SaverError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) => SaverError::BackendUnavailable(msg),
            BackendError::Rejected(msg) => SaverError::BackendRejected(msg),
            BackendError::NotFound(key) => {
                SaverError::BackendRejected(format!("blob {key} is missing on the backend"))
            }
        }
    }
}

impl From<CatalogError> for SaverError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Io(e) => SaverError::Io(e),
            other => SaverError::CatalogCorrupt(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(SaverError::Usage("x".into()).exit_code(), 2);
        assert_eq!(SaverError::CompoundExists("x".into()).exit_code(), 2);
        assert_eq!(SaverError::BackendUnavailable("x".into()).exit_code(), 3);
        assert_eq!(SaverError::CatalogCorrupt("x".into()).exit_code(), 4);
        assert_eq!(
            SaverError::resource_corrupt(Uuid::new_v4(), "bad").exit_code(),
            5
        );
        assert_eq!(SaverError::Cancelled.exit_code(), 1);
    }

    #[test]
    fn test_backend_error_mapping() {
        let err: SaverError = BackendError::Unavailable("down".into()).into();
        assert!(matches!(err, SaverError::BackendUnavailable(_)));
        let err: SaverError = BackendError::Rejected("no".into()).into();
        assert!(matches!(err, SaverError::BackendRejected(_)));
    }
}
