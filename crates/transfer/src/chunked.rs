use std::io::Read;
use std::ops::Range;
use std::path::Path;

use md5::{Digest, Md5};
use slicedrop_protocol::{ChunkId, ContentHash};

use crate::TransferError;
use crate::source::SourceFile;

// ---------------------------------------------------------------------------
// Digest helpers
// ---------------------------------------------------------------------------

/// Computes the content hash of `data` in one pass.
pub fn digest_bytes(data: &[u8]) -> ContentHash {
    let mut hasher = Md5::new();
    hasher.update(data);
    to_content_hash(hasher)
}

/// Computes the content hash of an entire file in one pass.
pub fn digest_file(path: &Path) -> Result<ContentHash, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(to_content_hash(hasher))
}

pub(crate) fn to_content_hash(hasher: Md5) -> ContentHash {
    ContentHash::from_digest(&hasher.finalize())
}

// ---------------------------------------------------------------------------
// FileChunk
// ---------------------------------------------------------------------------

/// One ordered byte range of a [`SourceFile`].
///
/// Holds no bytes itself; [`read`](Self::read) fetches them on demand.
#[derive(Debug, Clone)]
pub struct FileChunk {
    index: u64,
    range: Range<u64>,
    source: SourceFile,
}

impl FileChunk {
    /// Position of this chunk within the file.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Half-open byte range `[start, end)` covered by this chunk.
    pub fn range(&self) -> Range<u64> {
        self.range.clone()
    }

    /// Length in bytes.
    pub fn len(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id under which the server stores this chunk.
    pub fn id(&self, hash: &ContentHash) -> ChunkId {
        hash.chunk_id(self.index)
    }

    /// Reads the chunk's bytes. Blocking; call off the async runtime.
    pub fn read(&self) -> Result<Vec<u8>, TransferError> {
        self.source
            .read_range(&self.range)
            .map_err(|source| TransferError::ChunkRead {
                index: self.index,
                source,
            })
    }
}

/// Partitions `file` into `ceil(size / chunk_size)` ordered chunks.
///
/// Every chunk except possibly the last is exactly `chunk_size` bytes.
/// An empty file yields no chunks.
pub fn split(file: &SourceFile, chunk_size: u64) -> Result<Vec<FileChunk>, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize);
    }

    let size = file.size();
    let count = size.div_ceil(chunk_size);
    let chunks = (0..count)
        .map(|index| {
            let start = index * chunk_size;
            let end = (start + chunk_size).min(size);
            FileChunk {
                index,
                range: start..end,
                source: file.clone(),
            }
        })
        .collect();

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn digest_bytes_is_lowercase_md5() {
        assert_eq!(digest_bytes(b"").as_str(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            digest_bytes(b"The quick brown fox jumps over the lazy dog").as_str(),
            "9e107d9d372bb6826bd81d3542a419d6"
        );
    }

    #[test]
    fn digest_file_matches_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.bin");
        let data = patterned(20_000);
        std::fs::File::create(&path).unwrap().write_all(&data).unwrap();

        assert_eq!(digest_file(&path).unwrap(), digest_bytes(&data));
    }

    #[test]
    fn split_rejects_zero_chunk_size() {
        let src = SourceFile::from_bytes("a", b"abc".to_vec());
        assert!(matches!(split(&src, 0), Err(TransferError::InvalidChunkSize)));
    }

    #[test]
    fn split_partitions_without_gap_or_overlap() {
        for (size, chunk_size) in [(10, 4), (12, 4), (1, 4), (4, 4), (1000, 7), (5, 100)] {
            let src = SourceFile::from_bytes("f", patterned(size));
            let chunks = split(&src, chunk_size).unwrap();

            assert_eq!(chunks.len() as u64, (size as u64).div_ceil(chunk_size));
            let mut expected_start = 0;
            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.index(), i as u64);
                assert_eq!(chunk.range().start, expected_start);
                if i + 1 < chunks.len() {
                    assert_eq!(chunk.len(), chunk_size);
                } else {
                    assert!(chunk.len() <= chunk_size && !chunk.is_empty());
                }
                expected_start = chunk.range().end;
            }
            assert_eq!(expected_start, size as u64);
        }
    }

    #[test]
    fn split_empty_file_has_no_chunks() {
        let src = SourceFile::from_bytes("empty", Vec::new());
        assert!(split(&src, 4).unwrap().is_empty());
    }

    #[test]
    fn chunks_concatenate_to_original() {
        let data = patterned(2_500);
        let src = SourceFile::from_bytes("f", data.clone());
        let mut joined = Vec::new();
        for chunk in split(&src, 1_000).unwrap() {
            joined.extend(chunk.read().unwrap());
        }
        assert_eq!(joined, data);
    }

    #[test]
    fn chunk_id_embeds_index() {
        let src = SourceFile::from_bytes("f", patterned(10));
        let hash = digest_bytes(b"x");
        let chunks = split(&src, 4).unwrap();
        assert_eq!(chunks[2].id(&hash).as_str(), format!("{hash}-2"));
    }

    #[test]
    fn read_failure_reports_chunk_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.bin");
        std::fs::write(&path, patterned(10)).unwrap();
        let src = SourceFile::open(&path).unwrap();
        let chunks = split(&src, 4).unwrap();
        std::fs::remove_file(&path).unwrap();

        let err = chunks[1].read().unwrap_err();
        assert!(matches!(err, TransferError::ChunkRead { index: 1, .. }));
    }
}
