//! Resource plane: inner payload framing, the assembler that packs
//! fragments into backend blobs, and the read-side payload cache.

pub mod assembler;
pub mod cache;
pub mod format;

pub use assembler::{AssemblerConfig, ResourceBuilder};
pub use cache::ResourceCache;
