//! HTTP surface of the SliceDrop upload server.
//!
//! Exposes the chunk upload, verify and merge endpoints over a
//! [`ChunkStore`](slicedrop_chunk_store::ChunkStore), with permissive CORS
//! so browser clients on any origin can talk to it.

mod error;
mod routes;
mod server;

pub use error::ApiError;
pub use routes::router;
pub use server::{ServerConfig, UploadServer};

/// Default cap on a single request body. Chunks larger than this are
/// rejected before they reach the store.
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 64 * 1024 * 1024;

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server already running")]
    AlreadyRunning,
}
