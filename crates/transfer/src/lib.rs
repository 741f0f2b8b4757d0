//! Client side of the chunked upload: splitting a file into ordered
//! byte ranges and folding those ranges into one content digest.
//!
//! Chunks are lazy views over their source. Bytes are only read when a
//! chunk is hashed or uploaded, and are dropped right after, so memory
//! use does not grow with file size.

mod chunked;
mod hasher;
mod source;

pub use chunked::{FileChunk, digest_bytes, digest_file, split};
pub use hasher::{HashEvent, HashWorker};
pub use source::SourceFile;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("failed to read chunk {index}: {source}")]
    ChunkRead {
        index: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("hashing failed: {0}")]
    HashFailed(String),

    #[error("hash worker exited without a result")]
    WorkerGone,

    #[error(transparent)]
    Protocol(#[from] slicedrop_protocol::ProtocolError),
}
