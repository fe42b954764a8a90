//! GraphVault ingestion pipeline
//!
//! The multi-stage, checkpointed worker path:
//! download -> PDF-to-markdown -> chunk -> embed -> graph extraction
//! (stateful windowing or paginated-from-cache) -> entity resolution &
//! merge -> orphan bridging -> graph persistence.

pub mod chunker;
pub mod errors;
pub mod extractor;
pub mod pdf;
pub mod processor;

pub use chunker::{Chunk, RecursiveMarkdownSplitter, SplitterConfig};
pub use errors::IngestionError;
pub use extractor::GraphExtractor;
pub use processor::{IngestionOutcome, IngestionProcessor};
