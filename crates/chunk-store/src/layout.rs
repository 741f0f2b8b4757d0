use std::path::{Path, PathBuf};

use slicedrop_protocol::{ChunkId, ContentHash};

/// Name of the hidden directory for in-flight blobs.
const STAGING_DIR: &str = ".staging";

/// Resolves every on-disk path under a storage root.
///
/// All names come from validated [`ContentHash`] / [`ChunkId`] values and
/// sanitized extensions, so joined paths never leave the root.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Merged file for `hash` with extension `ext` (as from `file_extension`).
    pub fn final_file(&self, hash: &ContentHash, ext: &str) -> PathBuf {
        self.root.join(hash.final_file_name(ext))
    }

    pub fn chunk_dir(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.chunk_dir_name())
    }

    pub fn chunk_path(&self, hash: &ContentHash, id: &ChunkId) -> PathBuf {
        self.chunk_dir(hash).join(id.as_str())
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }
}
