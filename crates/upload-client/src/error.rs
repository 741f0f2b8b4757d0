//! Upload error types.

/// Errors produced while uploading a file.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] slicedrop_transfer::TransferError),

    #[error("protocol error: {0}")]
    Protocol(#[from] slicedrop_protocol::ProtocolError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("merge rejected: {0}")]
    MergeRejected(String),

    #[error("refusing to upload an empty file")]
    EmptyFile,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
