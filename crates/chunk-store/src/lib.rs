//! Server-side chunk store and merge engine.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   <contentHash><ext>          merged files
//!   chunkDir_<contentHash>/     unmerged chunks, one file per chunk id
//!   .staging/                   in-flight uploads and merges
//! ```
//!
//! Uploads are lock-free: every write is an idempotent rename of a staged
//! blob, so racing uploads of the same chunk only waste work. Merges of
//! the same content are serialized, and the merged file appears under its
//! final name only once every chunk has been written.

mod layout;
mod merge;
mod staging;
mod store;

pub use layout::StorageLayout;
pub use merge::{ChunkFailure, MergePolicy, MergeReport};
pub use staging::StagedBlob;
pub use store::ChunkStore;

use slicedrop_protocol::ContentHash;

/// Errors produced while storing chunks.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by a merge.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("no chunks stored for {0}")]
    NoChunks(ContentHash),

    #[error("chunk set is incomplete, missing indices {missing:?}")]
    Incomplete { missing: Vec<u64> },

    #[error("chunk {chunk_id} is {len} bytes, expected {expected}")]
    ChunkSizeMismatch {
        chunk_id: String,
        len: u64,
        expected: u64,
    },

    #[error("chunk index {index} is stored more than once")]
    DuplicateIndex { index: u64 },

    #[error("chunk {chunk_id} does not fit in a file at chunk size {chunk_size}")]
    OffsetOutOfRange { chunk_id: String, chunk_size: u64 },

    #[error("{}", summarize_failures(.failures))]
    Chunks { failures: Vec<ChunkFailure> },
}

fn summarize_failures(failures: &[ChunkFailure]) -> String {
    match failures.first() {
        Some(first) => format!("{} chunk(s) failed to merge, first: {first}", failures.len()),
        None => "merge failed".into(),
    }
}
