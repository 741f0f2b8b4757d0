use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use slicedrop_protocol::{ChunkId, ChunkOutcome, ContentHash, VerifyResponse, file_extension};
use tracing::{debug, info};

use crate::layout::StorageLayout;
use crate::merge::{self, MergePolicy, MergeReport};
use crate::staging::StagedBlob;
use crate::{MergeError, StoreError};

/// Disk-backed chunk store rooted at one directory.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct ChunkStore {
    layout: StorageLayout,
    policy: MergePolicy,
    merge_locks: Mutex<HashMap<ContentHash, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChunkStore {
    /// Opens (creating if needed) a store at `root`.
    ///
    /// Leftover staged blobs from a previous run are discarded.
    pub async fn open(root: impl Into<PathBuf>, policy: MergePolicy) -> Result<Self, StoreError> {
        let layout = StorageLayout::new(root);
        tokio::fs::create_dir_all(layout.root()).await?;

        let staging = layout.staging_dir();
        match tokio::fs::remove_dir_all(&staging).await {
            Ok(()) => debug!(path = %staging.display(), "cleared stale staging directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&staging).await?;

        info!(root = %layout.root().display(), ?policy, "chunk store opened");
        Ok(Self {
            layout,
            policy,
            merge_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Creates an empty blob in the staging directory for an incoming chunk.
    pub fn stage(&self) -> Result<StagedBlob, StoreError> {
        Ok(StagedBlob::create(&self.layout.staging_dir())?)
    }

    /// Stores one chunk, unless the file or the chunk is already present.
    ///
    /// The blob is dropped (and its staged file removed) on every outcome
    /// except [`ChunkOutcome::Received`].
    ///
    /// Uploads take no lock, so a merge of the same hash may finish while
    /// the blob is being persisted. The final file is checked again
    /// afterwards and a chunk directory recreated behind the merge is
    /// removed.
    pub async fn receive_chunk(
        &self,
        blob: StagedBlob,
        chunk_id: &ChunkId,
        hash: &ContentHash,
        filename: &str,
    ) -> Result<ChunkOutcome, StoreError> {
        let final_path = self.layout.final_file(hash, &file_extension(filename));
        if tokio::fs::try_exists(&final_path).await? {
            debug!(%hash, %chunk_id, "file already merged, chunk discarded");
            return Ok(ChunkOutcome::FileExists);
        }

        let chunk_path = self.layout.chunk_path(hash, chunk_id);
        if tokio::fs::try_exists(&chunk_path).await? {
            debug!(%hash, %chunk_id, "chunk already stored, discarded");
            return Ok(ChunkOutcome::ChunkExists);
        }

        tokio::fs::create_dir_all(self.layout.chunk_dir(hash)).await?;
        let len = blob.len();
        let persisted = blob.persist(&chunk_path).await;
        if self.discard_if_merged(hash, &final_path).await? {
            debug!(%hash, %chunk_id, "merge finished during upload, chunk discarded");
            return Ok(ChunkOutcome::FileExists);
        }
        persisted?;
        debug!(%hash, %chunk_id, bytes = len, "chunk stored");
        Ok(ChunkOutcome::Received)
    }

    /// Removes the chunk directory of `hash` if its final file exists.
    ///
    /// Returns whether the file exists.
    async fn discard_if_merged(&self, hash: &ContentHash, final_path: &Path) -> Result<bool, StoreError> {
        if !tokio::fs::try_exists(final_path).await? {
            return Ok(false);
        }
        match tokio::fs::remove_dir_all(self.layout.chunk_dir(hash)).await {
            Ok(()) => debug!(%hash, "removed chunk directory left behind a merge"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }

    /// Reports whether `hash` still needs uploading and which chunks exist.
    pub async fn verify(&self, hash: &ContentHash, filename: &str) -> Result<VerifyResponse, StoreError> {
        let final_path = self.layout.final_file(hash, &file_extension(filename));
        if tokio::fs::try_exists(&final_path).await? {
            return Ok(VerifyResponse::file_exists());
        }

        let uploaded = merge::read_chunk_dir(&self.layout.chunk_dir(hash))
            .await?
            .unwrap_or_default()
            .into_iter()
            .map(|chunk| chunk.name)
            .collect();
        Ok(VerifyResponse::upload_needed(uploaded))
    }

    /// Merges the stored chunks of `hash` into its final file.
    ///
    /// Concurrent merges of the same hash run one after another; the later
    /// ones find the file in place and report `already_merged`.
    pub async fn merge(
        &self,
        hash: &ContentHash,
        filename: &str,
        chunk_size: u64,
    ) -> Result<MergeReport, MergeError> {
        let lease = self.merge_lock(hash);
        let _guard = lease.lock().await;
        merge::merge_chunks(&self.layout, hash, filename, chunk_size, self.policy).await
    }

    fn merge_lock(&self, hash: &ContentHash) -> MergeLease<'_> {
        let mut locks = self.merge_locks.lock().unwrap_or_else(|e| e.into_inner());
        let lock = locks.entry(hash.clone()).or_default().clone();
        MergeLease {
            store: self,
            hash: hash.clone(),
            lock,
        }
    }

    /// Drops the lock entry once only the map and the departing lease
    /// reference it.
    fn release_merge_lock(&self, hash: &ContentHash) {
        let mut locks = self.merge_locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(hash).is_some_and(|lock| Arc::strong_count(lock) == 2) {
            locks.remove(hash);
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.merge_locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A handle on one hash's merge lock.
///
/// Dropping it releases the map entry, also when the merge unwinds.
struct MergeLease<'a> {
    store: &'a ChunkStore,
    hash: ContentHash,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl MergeLease<'_> {
    async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for MergeLease<'_> {
    fn drop(&mut self) {
        self.store.release_merge_lock(&self.hash);
    }
}
