//! Incremental content hashing on a dedicated thread.
//!
//! The worker owns its chunk list and its digest state; the caller only
//! sees [`HashEvent`]s arriving over a channel. A worker hashes exactly one
//! file and then exits.

use md5::{Digest, Md5};
use slicedrop_protocol::ContentHash;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::TransferError;
use crate::chunked::{FileChunk, to_content_hash};

/// Event channel capacity. Progress is one message per chunk, so a
/// slow consumer only makes the worker pause between chunks.
const EVENT_BUFFER: usize = 64;

/// Message sent by a [`HashWorker`].
#[derive(Debug, Clone, PartialEq)]
pub enum HashEvent {
    /// A chunk (other than the last) was folded in.
    Progress { percentage: f64 },
    /// Terminal: every chunk was folded in.
    Done {
        percentage: f64,
        digest: ContentHash,
    },
    /// Terminal: reading a chunk failed. No digest is produced.
    Failed { error: String },
}

impl HashEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Handle to a running hash computation.
pub struct HashWorker {
    events: mpsc::Receiver<HashEvent>,
}

impl HashWorker {
    /// Starts hashing `chunks` on a new OS thread.
    ///
    /// Chunks are folded strictly by ascending index regardless of the
    /// order they are passed in.
    pub fn spawn(mut chunks: Vec<FileChunk>) -> Result<Self, TransferError> {
        chunks.sort_by_key(FileChunk::index);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        std::thread::Builder::new()
            .name("slicedrop-hasher".into())
            .spawn(move || run(chunks, tx))?;

        Ok(Self { events: rx })
    }

    /// Receives the next event. Returns `None` after the terminal event.
    pub async fn next_event(&mut self) -> Option<HashEvent> {
        self.events.recv().await
    }

    /// Waits for the digest, discarding progress events.
    pub async fn finish(self) -> Result<ContentHash, TransferError> {
        self.finish_with(|_| {}).await
    }

    /// Waits for the digest, calling `on_progress` with each percentage.
    pub async fn finish_with(
        mut self,
        mut on_progress: impl FnMut(f64),
    ) -> Result<ContentHash, TransferError> {
        while let Some(event) = self.events.recv().await {
            match event {
                HashEvent::Progress { percentage } => on_progress(percentage),
                HashEvent::Done { percentage, digest } => {
                    on_progress(percentage);
                    return Ok(digest);
                }
                HashEvent::Failed { error } => return Err(TransferError::HashFailed(error)),
            }
        }
        Err(TransferError::WorkerGone)
    }
}

/// Worker body: a plain sequential fold over the chunks.
fn run(chunks: Vec<FileChunk>, tx: mpsc::Sender<HashEvent>) {
    let total = chunks.len();
    let mut hasher = Md5::new();

    for (i, chunk) in chunks.iter().enumerate() {
        let bytes = match chunk.read() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(index = chunk.index(), error = %e, "hashing aborted");
                let _ = tx.blocking_send(HashEvent::Failed {
                    error: e.to_string(),
                });
                return;
            }
        };
        hasher.update(&bytes);
        drop(bytes);

        let processed = i + 1;
        if processed < total {
            let percentage = processed as f64 / total as f64 * 100.0;
            if tx.blocking_send(HashEvent::Progress { percentage }).is_err() {
                debug!("hash receiver dropped, stopping");
                return;
            }
        }
    }

    let digest = to_content_hash(hasher);
    debug!(chunks = total, %digest, "hashing complete");
    let _ = tx.blocking_send(HashEvent::Done {
        percentage: 100.0,
        digest,
    });
}
