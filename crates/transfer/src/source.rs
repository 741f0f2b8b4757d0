use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::TransferError;

/// A file selected for upload.
///
/// Cloning is cheap: the path or buffer is shared, never copied.
#[derive(Debug, Clone)]
pub struct SourceFile {
    name: String,
    size: u64,
    data: SourceData,
}

#[derive(Debug, Clone)]
enum SourceData {
    Path(Arc<PathBuf>),
    Memory(Arc<[u8]>),
}

impl SourceFile {
    /// Opens a file on disk. Only its metadata is read here.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            name,
            size: metadata.len(),
            data: SourceData::Path(Arc::new(path.to_path_buf())),
        })
    }

    /// Wraps an in-memory buffer.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            data: SourceData::Memory(bytes),
        }
    }

    /// Original file name (used for the merged file's extension).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reads exactly the bytes in `range`.
    ///
    /// Fails with `UnexpectedEof` if the file shrank since it was opened.
    pub(crate) fn read_range(&self, range: &Range<u64>) -> std::io::Result<Vec<u8>> {
        let len = (range.end - range.start) as usize;
        match &self.data {
            SourceData::Path(path) => {
                let mut file = std::fs::File::open(path.as_ref())?;
                file.seek(SeekFrom::Start(range.start))?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf)?;
                Ok(buf)
            }
            SourceData::Memory(bytes) => bytes
                .get(range.start as usize..range.end as usize)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof)),
        }
    }
}
