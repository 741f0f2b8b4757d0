//! Fan-out/fan-in merge of a chunk directory into its final file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use slicedrop_protocol::{ChunkId, ContentHash, file_extension, is_hidden_artifact};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::MergeError;
use crate::layout::StorageLayout;

/// How much a merge trusts the stored chunk set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Merge whatever is stored. Missing indices leave holes and the
    /// chunk size is taken from the request as-is.
    #[default]
    Lenient,
    /// Require indices `0..N` with no gaps and every chunk except the
    /// last to be exactly `chunk_size` bytes.
    Strict,
}

/// Outcome of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Path of the merged file.
    pub path: PathBuf,
    /// Number of chunks folded in by this call.
    pub chunks: usize,
    /// Bytes copied by this call.
    pub bytes: u64,
    /// The file already existed; nothing was written.
    pub already_merged: bool,
}

/// A chunk whose write or cleanup failed.
#[derive(Debug, thiserror::Error)]
#[error("{chunk_id}: {error}")]
pub struct ChunkFailure {
    pub chunk_id: String,
    #[source]
    pub error: std::io::Error,
}

/// A file found in a chunk directory.
#[derive(Debug, Clone)]
pub(crate) struct StoredChunk {
    pub name: String,
    pub id: Option<ChunkId>,
    pub path: PathBuf,
    pub len: u64,
}

/// Lists a chunk directory, skipping OS artifacts.
///
/// Parseable ids come first in index order, anything else follows by name.
/// Returns `Ok(None)` if the directory does not exist.
pub(crate) async fn read_chunk_dir(dir: &Path) -> std::io::Result<Option<Vec<StoredChunk>>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut chunks = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden_artifact(&name) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        chunks.push(StoredChunk {
            id: ChunkId::parse(&name).ok(),
            name,
            path: entry.path(),
            len: metadata.len(),
        });
    }

    chunks.sort_by(|a, b| match (&a.id, &b.id) {
        (Some(x), Some(y)) => x.index().cmp(&y.index()).then_with(|| a.name.cmp(&b.name)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });
    Ok(Some(chunks))
}

/// Merges the chunk directory of `hash` into `<hash><ext>`.
///
/// Every chunk is copied concurrently to `index * chunk_size` in a staged
/// output file and deleted once its copy completes. The output is renamed
/// into place only if all chunks succeeded.
pub(crate) async fn merge_chunks(
    layout: &StorageLayout,
    hash: &ContentHash,
    filename: &str,
    chunk_size: u64,
    policy: MergePolicy,
) -> Result<MergeReport, MergeError> {
    if chunk_size == 0 {
        return Err(MergeError::InvalidChunkSize);
    }

    let final_path = layout.final_file(hash, &file_extension(filename));
    let chunk_dir = layout.chunk_dir(hash);

    if tokio::fs::try_exists(&final_path).await? {
        if tokio::fs::try_exists(&chunk_dir).await? {
            tokio::fs::remove_dir_all(&chunk_dir).await?;
            info!(%hash, "removed chunk directory superseded by merged file");
        }
        return Ok(MergeReport {
            path: final_path,
            chunks: 0,
            bytes: 0,
            already_merged: true,
        });
    }

    let stored = read_chunk_dir(&chunk_dir)
        .await?
        .ok_or_else(|| MergeError::NoChunks(hash.clone()))?;

    let mut records = Vec::with_capacity(stored.len());
    for chunk in stored {
        match chunk.id {
            Some(id) => records.push((id, chunk.path, chunk.len)),
            None => warn!(%hash, name = %chunk.name, "ignoring unrecognized file in chunk directory"),
        }
    }
    if records.is_empty() {
        return Err(MergeError::NoChunks(hash.clone()));
    }

    check_distinct(&records)?;
    if policy == MergePolicy::Strict {
        check_complete(&records, chunk_size)?;
    }
    let placements = place_chunks(&records, chunk_size)?;

    let output = tempfile::Builder::new()
        .prefix(".merge-")
        .tempfile_in(layout.staging_dir())?
        .into_temp_path();
    let output_path = output.to_path_buf();

    let mut tasks = JoinSet::new();
    for (chunk_id, source, offset) in placements {
        let target = output_path.clone();
        tasks.spawn(async move {
            let result = write_then_remove(&source, &target, offset).await;
            (chunk_id, result)
        });
    }

    let mut failures = Vec::new();
    let mut bytes = 0u64;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(n))) => bytes += n,
            Ok((chunk_id, Err(error))) => failures.push(ChunkFailure { chunk_id, error }),
            Err(e) => failures.push(ChunkFailure {
                chunk_id: "<task>".into(),
                error: std::io::Error::other(e),
            }),
        }
    }

    if !failures.is_empty() {
        failures.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));
        return Err(MergeError::Chunks { failures });
    }

    tokio::fs::rename(&*output, &final_path).await?;
    // The output now lives at `final_path`; stop the temp path from deleting it.
    let _ = output.keep();
    tokio::fs::remove_dir_all(&chunk_dir).await?;

    info!(
        %hash,
        chunks = records.len(),
        bytes,
        path = %final_path.display(),
        "merge complete"
    );

    Ok(MergeReport {
        path: final_path,
        chunks: records.len(),
        bytes,
        already_merged: false,
    })
}

/// Copies one chunk into place, then deletes it.
async fn write_then_remove(source: &Path, target: &Path, offset: u64) -> std::io::Result<u64> {
    let mut input = tokio::fs::File::open(source).await?;
    let mut output = tokio::fs::OpenOptions::new()
        .write(true)
        .open(target)
        .await?;
    output.seek(std::io::SeekFrom::Start(offset)).await?;
    let n = tokio::io::copy(&mut input, &mut output).await?;
    output.flush().await?;
    drop(output);
    drop(input);

    tokio::fs::remove_file(source).await?;
    debug!(source = %source.display(), offset, bytes = n, "chunk merged");
    Ok(n)
}

/// Highest byte offset a chunk may end at. Seeks past this fail.
const MAX_FILE_END: u64 = i64::MAX as u64;

/// Fails if two stored chunks claim the same index.
///
/// `records` must be sorted by index.
fn check_distinct(records: &[(ChunkId, PathBuf, u64)]) -> Result<(), MergeError> {
    for pair in records.windows(2) {
        if pair[0].0.index() == pair[1].0.index() {
            return Err(MergeError::DuplicateIndex {
                index: pair[0].0.index(),
            });
        }
    }
    Ok(())
}

/// Resolves every chunk to its byte offset in the output.
///
/// Fails before anything is written if a chunk would end past the largest
/// representable file offset.
fn place_chunks(
    records: &[(ChunkId, PathBuf, u64)],
    chunk_size: u64,
) -> Result<Vec<(String, PathBuf, u64)>, MergeError> {
    records
        .iter()
        .map(|(id, path, len)| {
            id.index()
                .checked_mul(chunk_size)
                .filter(|offset| offset.checked_add(*len).is_some_and(|end| end <= MAX_FILE_END))
                .map(|offset| (id.to_string(), path.clone(), offset))
                .ok_or_else(|| MergeError::OffsetOutOfRange {
                    chunk_id: id.to_string(),
                    chunk_size,
                })
        })
        .collect()
}

/// Requires indices `0..N` exactly and chunk lengths matching `chunk_size`.
///
/// Indices are distinct, so any index at or past `N` implies a gap below
/// `N`; only that bounded range is reported as missing.
fn check_complete(records: &[(ChunkId, PathBuf, u64)], chunk_size: u64) -> Result<(), MergeError> {
    let count = records.len() as u64;
    let present: std::collections::BTreeSet<u64> =
        records.iter().map(|(id, _, _)| id.index()).collect();
    let missing: Vec<u64> = (0..count).filter(|i| !present.contains(i)).collect();
    if !missing.is_empty() {
        return Err(MergeError::Incomplete { missing });
    }

    for (id, _, len) in records {
        let is_last = id.index() + 1 == count;
        let ok = if is_last {
            *len > 0 && *len <= chunk_size
        } else {
            *len == chunk_size
        };
        if !ok {
            return Err(MergeError::ChunkSizeMismatch {
                chunk_id: id.to_string(),
                len: *len,
                expected: chunk_size,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> ContentHash {
        ContentHash::parse("feedbeef").unwrap()
    }

    fn setup() -> (tempfile::TempDir, StorageLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        std::fs::create_dir_all(layout.staging_dir()).unwrap();
        (dir, layout)
    }

    fn store_chunk(layout: &StorageLayout, index: u64, data: &[u8]) {
        let h = hash();
        std::fs::create_dir_all(layout.chunk_dir(&h)).unwrap();
        std::fs::write(layout.chunk_path(&h, &h.chunk_id(index)), data).unwrap();
    }

    fn original(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    fn store_all(layout: &StorageLayout, data: &[u8], chunk_size: usize) {
        for (i, part) in data.chunks(chunk_size).enumerate() {
            store_chunk(layout, i as u64, part);
        }
    }

    #[tokio::test]
    async fn merge_reassembles_and_cleans_up() {
        let (_dir, layout) = setup();
        let data = original(2_500);
        store_all(&layout, &data, 1_000);

        let report = merge_chunks(&layout, &hash(), "video.mp4", 1_000, MergePolicy::Lenient)
            .await
            .unwrap();

        assert_eq!(report.chunks, 3);
        assert_eq!(report.bytes, 2_500);
        assert!(!report.already_merged);
        assert_eq!(report.path, layout.final_file(&hash(), ".mp4"));
        assert_eq!(std::fs::read(&report.path).unwrap(), data);
        assert!(!layout.chunk_dir(&hash()).exists());
        assert_eq!(std::fs::read_dir(layout.staging_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn indices_sort_numerically_past_ten() {
        let (_dir, layout) = setup();
        let data = original(12 * 10 + 3);
        store_all(&layout, &data, 10);

        let report = merge_chunks(&layout, &hash(), "a.bin", 10, MergePolicy::Strict)
            .await
            .unwrap();
        assert_eq!(report.chunks, 13);
        assert_eq!(std::fs::read(&report.path).unwrap(), data);
    }

    #[tokio::test]
    async fn hidden_artifacts_are_ignored() {
        let (_dir, layout) = setup();
        let data = original(30);
        store_all(&layout, &data, 10);
        std::fs::write(layout.chunk_dir(&hash()).join(".DS_Store"), b"junk").unwrap();

        let report = merge_chunks(&layout, &hash(), "a.bin", 10, MergePolicy::Lenient)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&report.path).unwrap(), data);
        assert!(!layout.chunk_dir(&hash()).exists());
    }

    #[tokio::test]
    async fn lenient_merge_leaves_hole_for_missing_chunk() {
        let (_dir, layout) = setup();
        store_chunk(&layout, 0, b"aaaa");
        store_chunk(&layout, 2, b"cc");

        let report = merge_chunks(&layout, &hash(), "a.bin", 4, MergePolicy::Lenient)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&report.path).unwrap(), b"aaaa\0\0\0\0cc");
    }

    #[tokio::test]
    async fn strict_merge_rejects_gap() {
        let (_dir, layout) = setup();
        store_chunk(&layout, 0, b"aaaa");
        store_chunk(&layout, 2, b"cc");

        let err = merge_chunks(&layout, &hash(), "a.bin", 4, MergePolicy::Strict)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Incomplete { ref missing } if missing == &vec![1]));
        // Nothing was consumed.
        assert!(layout.chunk_path(&hash(), &hash().chunk_id(0)).exists());
    }

    #[tokio::test]
    async fn strict_merge_rejects_wrong_chunk_size() {
        let (_dir, layout) = setup();
        store_chunk(&layout, 0, b"aaaa");
        store_chunk(&layout, 1, b"bb");

        let err = merge_chunks(&layout, &hash(), "a.bin", 3, MergePolicy::Strict)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::ChunkSizeMismatch { len: 4, expected: 3, .. }));
    }

    /// Stores a chunk under an arbitrary file name in the hash's directory.
    fn store_named(layout: &StorageLayout, name: &str, data: &[u8]) {
        let dir = layout.chunk_dir(&hash());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), data).unwrap();
    }

    #[tokio::test]
    async fn strict_merge_rejects_oversized_final_chunk() {
        let (_dir, layout) = setup();
        store_chunk(&layout, 0, b"aaaa");
        store_chunk(&layout, 1, b"bbbbb");

        let err = merge_chunks(&layout, &hash(), "a.bin", 4, MergePolicy::Strict)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MergeError::ChunkSizeMismatch { ref chunk_id, len: 5, expected: 4 } if chunk_id == "feedbeef-1"
        ));
        assert!(layout.chunk_path(&hash(), &hash().chunk_id(1)).exists());
    }

    #[tokio::test]
    async fn strict_merge_rejects_empty_final_chunk() {
        let (_dir, layout) = setup();
        store_chunk(&layout, 0, b"aaaa");
        store_chunk(&layout, 1, b"");

        let err = merge_chunks(&layout, &hash(), "a.bin", 4, MergePolicy::Strict)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::ChunkSizeMismatch { len: 0, expected: 4, .. }));
    }

    #[tokio::test]
    async fn strict_merge_reports_only_indices_below_chunk_count() {
        let (_dir, layout) = setup();
        store_chunk(&layout, 0, b"aaaa");
        store_chunk(&layout, 20_000_000, b"zz");

        let err = merge_chunks(&layout, &hash(), "a.bin", 4, MergePolicy::Strict)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Incomplete { ref missing } if missing == &vec![1]));
        assert!(layout.chunk_path(&hash(), &hash().chunk_id(0)).exists());
    }

    #[tokio::test]
    async fn offset_past_file_limit_is_rejected_before_writing() {
        let (_dir, layout) = setup();
        store_chunk(&layout, 0, b"aa");
        // 2^63 * 2 wraps to offset 0.
        store_chunk(&layout, 1 << 63, b"ZZ");

        let err = merge_chunks(&layout, &hash(), "a.bin", 2, MergePolicy::Lenient)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MergeError::OffsetOutOfRange { ref chunk_id, chunk_size: 2 }
                if chunk_id == "feedbeef-9223372036854775808"
        ));
        assert!(!layout.final_file(&hash(), ".bin").exists());
        assert_eq!(std::fs::read(layout.chunk_path(&hash(), &hash().chunk_id(0))).unwrap(), b"aa");
        assert_eq!(std::fs::read_dir(layout.staging_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn chunk_ending_past_file_limit_is_rejected() {
        let (_dir, layout) = setup();
        // Offset fits, offset + len does not.
        store_chunk(&layout, u64::MAX, b"zz");

        let err = merge_chunks(&layout, &hash(), "a.bin", 1, MergePolicy::Lenient)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::OffsetOutOfRange { .. }));
        assert!(layout.chunk_dir(&hash()).exists());
    }

    #[tokio::test]
    async fn duplicate_index_fails_merge() {
        let (_dir, layout) = setup();
        store_chunk(&layout, 0, b"aaaa");
        store_named(&layout, "other-0", b"ZZZZ");

        for policy in [MergePolicy::Lenient, MergePolicy::Strict] {
            let err = merge_chunks(&layout, &hash(), "a.bin", 4, policy)
                .await
                .unwrap_err();
            assert!(matches!(err, MergeError::DuplicateIndex { index: 0 }));
        }
        assert!(!layout.final_file(&hash(), ".bin").exists());
        assert_eq!(std::fs::read(layout.chunk_path(&hash(), &hash().chunk_id(0))).unwrap(), b"aaaa");
    }

    #[tokio::test]
    async fn missing_directory_is_no_chunks() {
        let (_dir, layout) = setup();
        let err = merge_chunks(&layout, &hash(), "a.bin", 4, MergePolicy::Lenient)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::NoChunks(_)));
    }

    #[tokio::test]
    async fn zero_chunk_size_rejected() {
        let (_dir, layout) = setup();
        store_chunk(&layout, 0, b"a");
        let err = merge_chunks(&layout, &hash(), "a.bin", 0, MergePolicy::Lenient)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::InvalidChunkSize));
    }

    #[tokio::test]
    async fn existing_file_supersedes_stale_chunks() {
        let (_dir, layout) = setup();
        std::fs::write(layout.final_file(&hash(), ".bin"), b"done").unwrap();
        store_chunk(&layout, 0, b"stale");

        let report = merge_chunks(&layout, &hash(), "a.bin", 4, MergePolicy::Lenient)
            .await
            .unwrap();
        assert!(report.already_merged);
        assert_eq!(std::fs::read(&report.path).unwrap(), b"done");
        assert!(!layout.chunk_dir(&hash()).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_chunk_fails_merge_and_keeps_directory() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, layout) = setup();
        store_chunk(&layout, 0, b"aaaa");
        store_chunk(&layout, 1, b"bb");
        let bad = layout.chunk_path(&hash(), &hash().chunk_id(1));
        std::fs::set_permissions(&bad, std::fs::Permissions::from_mode(0o000)).unwrap();
        if std::fs::File::open(&bad).is_ok() {
            // Running as root; permissions are not enforced.
            return;
        }

        let err = merge_chunks(&layout, &hash(), "a.bin", 4, MergePolicy::Lenient)
            .await
            .unwrap_err();
        let MergeError::Chunks { failures } = err else {
            panic!("expected chunk failures, got {err:?}");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].chunk_id, "feedbeef-1");
        assert!(!layout.final_file(&hash(), ".bin").exists());
        assert!(layout.chunk_dir(&hash()).exists());
        assert_eq!(std::fs::read_dir(layout.staging_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn read_chunk_dir_orders_by_index() {
        let (_dir, layout) = setup();
        for i in [10, 2, 0, 1] {
            store_chunk(&layout, i, b"x");
        }
        std::fs::write(layout.chunk_dir(&hash()).join("Thumbs.db"), b"").unwrap();

        let listed = read_chunk_dir(&layout.chunk_dir(&hash())).await.unwrap().unwrap();
        let names: Vec<&str> = listed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["feedbeef-0", "feedbeef-1", "feedbeef-2", "feedbeef-10"]);
    }
}
