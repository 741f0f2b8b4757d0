//! reqwest-backed [`UploadTransport`].

use reqwest::multipart::{Form, Part};
use slicedrop_protocol::constants::{
    FIELD_CHUNK_BLOB, FIELD_CHUNK_ID, FIELD_CONTENT_HASH, FIELD_FILENAME, MERGE_PATH,
    UPLOAD_CHUNK_PATH, VERIFY_PATH,
};
use slicedrop_protocol::{ChunkOutcome, MergeRequest, MergeResponse, VerifyRequest, VerifyResponse};
use tracing::debug;

use crate::UploadError;
use crate::transport::{ChunkUpload, TransportFuture, UploadTransport};

/// Talks to a SliceDrop server over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport for the server at `base_url`, e.g.
    /// `http://localhost:3000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl UploadTransport for HttpTransport {
    fn verify(&self, req: &VerifyRequest) -> TransportFuture<'_, VerifyResponse> {
        let req = req.clone();
        Box::pin(async move {
            let resp = self.client.post(self.url(VERIFY_PATH)).json(&req).send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            if !status.is_success() {
                return Err(UploadError::Server {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok(serde_json::from_str(&body)?)
        })
    }

    fn upload_chunk(&self, chunk: ChunkUpload) -> TransportFuture<'_, ChunkOutcome> {
        Box::pin(async move {
            let len = chunk.bytes.len();
            let blob = Part::bytes(chunk.bytes).file_name(chunk.chunk_id.to_string());
            let form = Form::new()
                .part(FIELD_CHUNK_BLOB, blob)
                .text(FIELD_CHUNK_ID, chunk.chunk_id.to_string())
                .text(FIELD_CONTENT_HASH, chunk.content_hash.to_string())
                .text(FIELD_FILENAME, chunk.filename);

            let resp = self
                .client
                .post(self.url(UPLOAD_CHUNK_PATH))
                .multipart(form)
                .send()
                .await?;
            let status = resp.status();
            let body = resp.text().await?;
            if !status.is_success() {
                return Err(UploadError::Server {
                    status: status.as_u16(),
                    body,
                });
            }

            let outcome = body.parse::<ChunkOutcome>()?;
            debug!(chunk_id = %chunk.chunk_id, bytes = len, %outcome, "chunk sent");
            Ok(outcome)
        })
    }

    fn merge(&self, req: &MergeRequest) -> TransportFuture<'_, MergeResponse> {
        let req = req.clone();
        Box::pin(async move {
            let resp = self.client.post(self.url(MERGE_PATH)).json(&req).send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            // Failed merges still carry a `{code, message}` body.
            match serde_json::from_str::<MergeResponse>(&body) {
                Ok(merge) => Ok(merge),
                Err(_) => Err(UploadError::Server {
                    status: status.as_u16(),
                    body,
                }),
            }
        })
    }
}
