//! pixvault stores arbitrary byte streams on backends that were never meant
//! to carry them (photo hosts, plain blob stores).
//!
//! Streams are split into fixed-size fragments, deduplicated by sha256,
//! packed into container resources, disguised per backend (PNG, SVG or raw)
//! and uploaded. A transactional catalog maps compound names to ordered
//! fragment sequences and fragments to the resources that carry them, so any
//! compound can be reconstructed byte-exactly.

pub mod backend;
pub mod catalog;
pub mod codec;
pub mod error;
pub mod fragment;
pub mod resource;
pub mod saver;
pub mod util;

pub use backend::{BackendError, StorageBackend, StorageClient};
pub use catalog::{Catalog, ContentHash};
pub use codec::{Compressor, Encapsulation, Wrapper};
pub use error::SaverError;
pub use saver::{Saver, SaverConfig, UploadOptions};
