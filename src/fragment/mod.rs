//! Fragment plane: chunking/encapsulation of the ingest stream and the
//! pending buffer that feeds the resource assembler.

pub mod cache;
pub mod pipeline;

pub use cache::PendingFragments;
pub use pipeline::FragmentPipeline;
