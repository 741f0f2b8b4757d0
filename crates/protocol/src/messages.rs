use serde::{Deserialize, Serialize};

use crate::constants::MERGE_SUCCESS_MESSAGE;
use crate::types::ContentHash;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Asks the server what it already holds for a piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(alias = "fileHash")]
    pub content_hash: ContentHash,
    pub filename: String,
}

/// Asks the server to assemble the stored chunks into the final file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    #[serde(alias = "fileHash")]
    pub content_hash: ContentHash,
    pub filename: String,
    /// Chunk size used when the file was split.
    #[serde(alias = "size")]
    pub chunk_size: u64,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Answer to [`VerifyRequest`].
///
/// `uploaded_list` is absent when the merged file already exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub should_upload: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_list: Option<Vec<String>>,
}

impl VerifyResponse {
    /// The merged file exists; the client can skip the upload.
    pub fn file_exists() -> Self {
        Self {
            should_upload: false,
            uploaded_list: None,
        }
    }

    /// Upload is needed; `uploaded` lists the chunk ids already stored.
    pub fn upload_needed(uploaded: Vec<String>) -> Self {
        Self {
            should_upload: true,
            uploaded_list: Some(uploaded),
        }
    }
}

/// Answer to [`MergeRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResponse {
    pub code: i32,
    pub message: String,
}

impl MergeResponse {
    pub fn success() -> Self {
        Self {
            code: 0,
            message: MERGE_SUCCESS_MESSAGE.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: 1,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}
