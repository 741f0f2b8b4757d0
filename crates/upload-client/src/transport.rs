//! Transport abstraction between the coordinator and the server.

use std::future::Future;
use std::pin::Pin;

use slicedrop_protocol::{
    ChunkId, ChunkOutcome, ContentHash, MergeRequest, MergeResponse, VerifyRequest,
    VerifyResponse,
};

use crate::UploadError;

/// Boxed future returned by [`UploadTransport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// One chunk ready to be sent.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub chunk_id: ChunkId,
    pub content_hash: ContentHash,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Abstract connection to an upload server.
///
/// [`HttpTransport`](crate::HttpTransport) is the production
/// implementation; tests substitute mocks.
pub trait UploadTransport: Send + Sync {
    /// Asks which chunks of `req.content_hash` the server already holds.
    fn verify(&self, req: &VerifyRequest) -> TransportFuture<'_, VerifyResponse>;

    /// Sends one chunk body.
    fn upload_chunk(&self, chunk: ChunkUpload) -> TransportFuture<'_, ChunkOutcome>;

    /// Asks the server to assemble the stored chunks.
    fn merge(&self, req: &MergeRequest) -> TransportFuture<'_, MergeResponse>;
}
