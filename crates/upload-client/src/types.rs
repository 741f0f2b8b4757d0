//! Data types for the upload flow.

use slicedrop_protocol::constants::DEFAULT_CHUNK_SIZE;
use slicedrop_protocol::{ChunkOutcome, ContentHash};

use crate::UploadError;

/// Default number of chunk uploads in flight at once.
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 4;

/// Tunables for one coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Bytes per chunk when splitting.
    pub chunk_size: u64,
    /// Upper bound on concurrent chunk requests.
    pub max_concurrent_uploads: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidConfig("chunk size must be greater than zero".into()));
        }
        if self.max_concurrent_uploads == 0 {
            return Err(UploadError::InvalidConfig(
                "concurrency must be at least one".into(),
            ));
        }
        Ok(())
    }
}

/// Progress event emitted during an upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// Content hashing progress.
    Hashing { percentage: f64 },
    /// The server answered the verify request.
    Verified {
        content_hash: ContentHash,
        total: usize,
        already_uploaded: usize,
    },
    /// One chunk was acknowledged.
    ChunkUploaded {
        chunk_id: String,
        outcome: ChunkOutcome,
        done: usize,
        total: usize,
    },
    /// All chunks are on the server; merge requested.
    Merging { content_hash: ContentHash },
    /// The server merged the file.
    Completed { content_hash: ContentHash },
    /// The server already had the file; nothing was sent.
    Skipped { content_hash: ContentHash },
    /// The upload failed.
    Failed { error: String },
}

/// Summary of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub content_hash: ContentHash,
    pub filename: String,
    /// Chunks the file was split into.
    pub total_chunks: usize,
    /// Chunks sent by this call.
    pub uploaded_chunks: usize,
    /// Chunk bytes sent by this call.
    pub uploaded_bytes: u64,
    /// `true` if the server already had the whole file.
    pub skipped: bool,
}
