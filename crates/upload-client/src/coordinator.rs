//! Upload coordinator: verify, send missing chunks, merge.

use std::collections::HashSet;
use std::path::Path;

use futures_util::StreamExt;
use futures_util::stream;
use slicedrop_protocol::{ChunkId, ChunkOutcome, ContentHash, MergeRequest, VerifyRequest};
use slicedrop_transfer::{FileChunk, HashWorker, SourceFile, split};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::UploadError;
use crate::transport::{ChunkUpload, UploadTransport};
use crate::types::{UploadConfig, UploadEvent, UploadReport};

/// Event channel capacity. Events are best-effort: when the channel is
/// full (or nobody took the receiver) new events are dropped.
const EVENT_BUFFER: usize = 256;

/// Drives uploads through an [`UploadTransport`].
pub struct UploadCoordinator<T> {
    transport: T,
    config: UploadConfig,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

impl<T: UploadTransport> UploadCoordinator<T> {
    pub fn new(transport: T, config: UploadConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        Self {
            transport,
            config,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Splits, hashes and uploads the file at `path`.
    pub async fn upload_path(&self, path: &Path) -> Result<UploadReport, UploadError> {
        let result = self.hash_and_upload(path).await;
        self.finish(result)
    }

    /// Uploads an already split and hashed file.
    ///
    /// `chunk_size` must be the size `chunks` were split with; the server
    /// uses it to place every chunk during the merge.
    pub async fn upload(
        &self,
        file: &SourceFile,
        chunks: Vec<FileChunk>,
        content_hash: &ContentHash,
        chunk_size: u64,
    ) -> Result<UploadReport, UploadError> {
        let result = self.coordinate(file, chunks, content_hash, chunk_size).await;
        self.finish(result)
    }

    async fn hash_and_upload(&self, path: &Path) -> Result<UploadReport, UploadError> {
        self.config.validate()?;

        let owned = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || SourceFile::open(&owned))
            .await
            .map_err(|e| UploadError::Io(std::io::Error::other(e)))??;
        if file.size() == 0 {
            return Err(UploadError::EmptyFile);
        }

        let chunks = split(&file, self.config.chunk_size)?;
        info!(
            file = %path.display(),
            size = file.size(),
            chunks = chunks.len(),
            "hashing"
        );

        let events_tx = self.events_tx.clone();
        let content_hash = HashWorker::spawn(chunks.clone())?
            .finish_with(|percentage| {
                let _ = events_tx.try_send(UploadEvent::Hashing { percentage });
            })
            .await?;
        info!(%content_hash, "hashing complete");

        self.coordinate(&file, chunks, &content_hash, self.config.chunk_size)
            .await
    }

    async fn coordinate(
        &self,
        file: &SourceFile,
        chunks: Vec<FileChunk>,
        content_hash: &ContentHash,
        chunk_size: u64,
    ) -> Result<UploadReport, UploadError> {
        self.config.validate()?;
        if chunks.is_empty() {
            return Err(UploadError::EmptyFile);
        }

        let filename = file.name().to_string();
        let total = chunks.len();

        // 1. Verify
        let verify = self
            .transport
            .verify(&VerifyRequest {
                content_hash: content_hash.clone(),
                filename: filename.clone(),
            })
            .await?;

        if !verify.should_upload {
            info!(%content_hash, %filename, "file already on server, skipping");
            self.emit(UploadEvent::Skipped {
                content_hash: content_hash.clone(),
            });
            return Ok(UploadReport {
                content_hash: content_hash.clone(),
                filename,
                total_chunks: total,
                uploaded_chunks: 0,
                uploaded_bytes: 0,
                skipped: true,
            });
        }

        let stored: HashSet<String> = verify.uploaded_list.unwrap_or_default().into_iter().collect();
        let pending: Vec<FileChunk> = chunks
            .into_iter()
            .filter(|chunk| !stored.contains(chunk.id(content_hash).as_str()))
            .collect();
        let already_uploaded = total - pending.len();
        debug!(%content_hash, total, already_uploaded, "verified");
        self.emit(UploadEvent::Verified {
            content_hash: content_hash.clone(),
            total,
            already_uploaded,
        });

        // 2. Upload missing chunks
        let mut done = already_uploaded;
        let mut uploaded_chunks = 0;
        let mut uploaded_bytes = 0;
        let mut results = stream::iter(pending)
            .map(|chunk| self.send_chunk(chunk, content_hash, &filename))
            .buffer_unordered(self.config.max_concurrent_uploads);

        while let Some(result) = results.next().await {
            let (chunk_id, outcome, len) = result?;
            done += 1;
            uploaded_chunks += 1;
            uploaded_bytes += len;
            self.emit(UploadEvent::ChunkUploaded {
                chunk_id: chunk_id.to_string(),
                outcome,
                done,
                total,
            });
        }
        drop(results);

        // 3. Merge
        self.emit(UploadEvent::Merging {
            content_hash: content_hash.clone(),
        });
        let merge = self
            .transport
            .merge(&MergeRequest {
                content_hash: content_hash.clone(),
                filename: filename.clone(),
                chunk_size,
            })
            .await?;
        if !merge.is_success() {
            return Err(UploadError::MergeRejected(merge.message));
        }

        info!(%content_hash, %filename, uploaded_chunks, uploaded_bytes, "upload complete");
        self.emit(UploadEvent::Completed {
            content_hash: content_hash.clone(),
        });

        Ok(UploadReport {
            content_hash: content_hash.clone(),
            filename,
            total_chunks: total,
            uploaded_chunks,
            uploaded_bytes,
            skipped: false,
        })
    }

    /// Reads one chunk off the runtime and sends it.
    async fn send_chunk(
        &self,
        chunk: FileChunk,
        content_hash: &ContentHash,
        filename: &str,
    ) -> Result<(ChunkId, ChunkOutcome, u64), UploadError> {
        let chunk_id = chunk.id(content_hash);
        let len = chunk.len();
        let bytes = tokio::task::spawn_blocking(move || chunk.read())
            .await
            .map_err(|e| UploadError::Io(std::io::Error::other(e)))??;

        let outcome = self
            .transport
            .upload_chunk(ChunkUpload {
                chunk_id: chunk_id.clone(),
                content_hash: content_hash.clone(),
                filename: filename.to_string(),
                bytes,
            })
            .await?;
        debug!(%chunk_id, %outcome, "chunk acknowledged");
        Ok((chunk_id, outcome, len))
    }

    fn finish(&self, result: Result<UploadReport, UploadError>) -> Result<UploadReport, UploadError> {
        if let Err(e) = &result {
            error!(error = %e, "upload failed");
            self.emit(UploadEvent::Failed {
                error: e.to_string(),
            });
        }
        result
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events_tx.try_send(event);
    }
}
