//! Wire types shared by the SliceDrop uploader and the upload server.
//!
//! Everything that crosses the process boundary lives here: endpoint
//! paths, response texts, request/response payloads and the identifiers
//! (content hash, chunk id) both sides must agree on.

pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{MergeRequest, MergeResponse, VerifyRequest, VerifyResponse};
pub use types::{ChunkId, ChunkOutcome, ContentHash, file_extension, is_hidden_artifact};

/// Errors produced while parsing wire identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid content hash: {0}")]
    InvalidContentHash(String),

    #[error("invalid chunk id: {0}")]
    InvalidChunkId(String),

    #[error("chunk id {chunk_id} does not belong to {content_hash}")]
    ForeignChunkId {
        chunk_id: String,
        content_hash: String,
    },

    #[error("unknown chunk upload response: {0}")]
    UnknownOutcome(String),
}
