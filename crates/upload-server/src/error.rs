use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use slicedrop_chunk_store::{MergeError, StoreError};
use slicedrop_protocol::MergeResponse;
use slicedrop_protocol::constants::RESPONSE_CHUNK_FAILED;

/// Errors returned by request handlers.
///
/// Chunk upload failures answer in plain text, the JSON endpoints answer
/// with a `{code: 1, message}` body. Both use status 500.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The multipart payload was malformed or could not be stored.
    #[error("{}: {}", RESPONSE_CHUNK_FAILED, .0)]
    Chunk(String),

    #[error("verify failed: {0}")]
    Verify(#[from] StoreError),

    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Chunk(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response(),
            ApiError::Verify(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MergeResponse::failure(e.to_string())),
            )
                .into_response(),
            ApiError::Merge(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MergeResponse::failure(e.to_string())),
            )
                .into_response(),
        }
    }
}
