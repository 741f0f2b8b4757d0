use std::path::Path;

use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

/// An uploaded chunk body written to the staging directory.
///
/// The blob lives on the same filesystem as the chunk directories, so
/// persisting it is a single rename. A blob that is dropped without being
/// persisted is deleted.
pub struct StagedBlob {
    file: Option<tokio::fs::File>,
    path: TempPath,
    len: u64,
}

impl StagedBlob {
    pub(crate) fn create(staging_dir: &Path) -> std::io::Result<Self> {
        let (file, path) = tempfile::Builder::new()
            .prefix(".chunk-")
            .tempfile_in(staging_dir)?
            .into_parts();

        Ok(Self {
            file: Some(tokio::fs::File::from_std(file)),
            path,
            len: 0,
        })
    }

    /// Appends `bytes` to the blob.
    pub async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let file = self.file.as_mut().ok_or_else(closed)?;
        file.write_all(bytes).await?;
        self.len += bytes.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Flushes and closes the file, then renames it to `target`.
    pub(crate) async fn persist(mut self, target: &Path) -> std::io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        tokio::fs::rename(&*self.path, target).await?;
        // The file now lives at `target`; stop the temp path from deleting it.
        let _ = self.path.keep();
        Ok(())
    }
}

impl std::fmt::Debug for StagedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedBlob")
            .field("path", &self.path.display())
            .field("len", &self.len)
            .finish()
    }
}

fn closed() -> std::io::Error {
    std::io::Error::other("staged blob already closed")
}
