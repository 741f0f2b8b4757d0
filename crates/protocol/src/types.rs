use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::constants::{
    CHUNK_DIR_PREFIX, CHUNK_ID_SEPARATOR, HIDDEN_ARTIFACTS, MAX_CONTENT_HASH_LEN,
    RESPONSE_CHUNK_EXISTS, RESPONSE_CHUNK_RECEIVED, RESPONSE_FILE_EXISTS,
};

/// Longest chunk id accepted from a client.
const MAX_CHUNK_ID_LEN: usize = 255;

/// Longest file extension kept when naming a merged file.
const MAX_EXTENSION_LEN: usize = 32;

// ---------------------------------------------------------------------------
// ContentHash
// ---------------------------------------------------------------------------

/// Digest identifying a file by its full byte content.
///
/// Only ASCII alphanumerics are accepted so the value can be used
/// verbatim as a path segment on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Validates and wraps a digest string.
    pub fn parse(value: impl Into<String>) -> Result<Self, ProtocolError> {
        let value = value.into();
        if value.is_empty()
            || value.len() > MAX_CONTENT_HASH_LEN
            || !value.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(ProtocolError::InvalidContentHash(value));
        }
        Ok(Self(value))
    }

    /// Hex-encodes a raw digest. Hex output always satisfies [`parse`](Self::parse).
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of the chunk at `index` for this content.
    pub fn chunk_id(&self, index: u64) -> ChunkId {
        ChunkId {
            raw: format!("{}{CHUNK_ID_SEPARATOR}{index}", self.0),
            index,
        }
    }

    /// Name of the directory holding this content's unmerged chunks.
    pub fn chunk_dir_name(&self) -> String {
        format!("{CHUNK_DIR_PREFIX}{}", self.0)
    }

    /// Name of the merged file, given an extension from [`file_extension`].
    pub fn final_file_name(&self, extension: &str) -> String {
        format!("{}{extension}", self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

// ---------------------------------------------------------------------------
// ChunkId
// ---------------------------------------------------------------------------

/// Identifier of one persisted chunk: `<digest>-<index>`.
///
/// The index is the decimal suffix after the last separator. Ids are also
/// file names inside a chunk directory, so they must be a single safe
/// path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkId {
    raw: String,
    index: u64,
}

impl ChunkId {
    /// Parses a chunk id received from a client or read from disk.
    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidChunkId(value.to_string());

        if value.is_empty() || value.len() > MAX_CHUNK_ID_LEN || value.starts_with('.') {
            return Err(invalid());
        }
        if value
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':' | '\0') || c.is_control())
        {
            return Err(invalid());
        }

        let (_, suffix) = value.rsplit_once(CHUNK_ID_SEPARATOR).ok_or_else(invalid)?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let index = suffix.parse::<u64>().map_err(|_| invalid())?;

        Ok(Self {
            raw: value.to_string(),
            index,
        })
    }

    /// Parses a chunk id that must be the canonical id `<hash>-<index>` of
    /// `hash`, as built by [`ContentHash::chunk_id`].
    pub fn parse_for(hash: &ContentHash, value: &str) -> Result<Self, ProtocolError> {
        let id = Self::parse(value)?;
        if hash.chunk_id(id.index) != id {
            return Err(ProtocolError::ForeignChunkId {
                chunk_id: value.to_string(),
                content_hash: hash.to_string(),
            });
        }
        Ok(id)
    }

    /// Numeric position of the chunk within its file.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ChunkId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// ChunkOutcome
// ---------------------------------------------------------------------------

/// Server verdict for one chunk upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkOutcome {
    /// The merged file already exists; nothing was written.
    FileExists,
    /// A chunk with this id is already stored; nothing was written.
    ChunkExists,
    /// The chunk was persisted.
    Received,
}

impl ChunkOutcome {
    /// Plain-text body used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileExists => RESPONSE_FILE_EXISTS,
            Self::ChunkExists => RESPONSE_CHUNK_EXISTS,
            Self::Received => RESPONSE_CHUNK_RECEIVED,
        }
    }
}

impl fmt::Display for ChunkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkOutcome {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            RESPONSE_FILE_EXISTS => Ok(Self::FileExists),
            RESPONSE_CHUNK_EXISTS => Ok(Self::ChunkExists),
            RESPONSE_CHUNK_RECEIVED => Ok(Self::Received),
            other => Err(ProtocolError::UnknownOutcome(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Name helpers
// ---------------------------------------------------------------------------

/// Extension of `filename` including the leading dot, or `""`.
///
/// Only the last path component is considered. Extensions containing
/// anything but ASCII alphanumerics, `_` or `-` are dropped so the result
/// is always safe to append to a file name.
pub fn file_extension(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let Some(dot) = name.rfind('.') else {
        return String::new();
    };

    let ext = &name[dot..];
    let valid = ext.len() > 1
        && ext.len() <= MAX_EXTENSION_LEN
        && ext[1..]
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');

    if valid { ext.to_string() } else { String::new() }
}

/// Returns `true` for files an OS drops into directories on its own.
pub fn is_hidden_artifact(name: &str) -> bool {
    name.starts_with('.') || HIDDEN_ARTIFACTS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> ContentHash {
        ContentHash::parse("9e107d9d372bb6826bd81d3542a419d6").unwrap()
    }

    #[test]
    fn content_hash_rejects_path_characters() {
        assert!(ContentHash::parse("").is_err());
        assert!(ContentHash::parse("../etc").is_err());
        assert!(ContentHash::parse("abc/def").is_err());
        assert!(ContentHash::parse("a".repeat(129)).is_err());
        assert!(ContentHash::parse("ABCdef0123").is_ok());
    }

    #[test]
    fn content_hash_from_digest_is_lowercase_hex() {
        let h = ContentHash::from_digest(&[0xAB, 0x01, 0xFF]);
        assert_eq!(h.as_str(), "ab01ff");
    }

    #[test]
    fn content_hash_derived_names() {
        let h = hash();
        assert_eq!(h.chunk_dir_name(), "chunkDir_9e107d9d372bb6826bd81d3542a419d6");
        assert_eq!(h.final_file_name(".mp4"), "9e107d9d372bb6826bd81d3542a419d6.mp4");
        assert_eq!(h.chunk_id(12).as_str(), "9e107d9d372bb6826bd81d3542a419d6-12");
        assert_eq!(h.chunk_id(12).index(), 12);
    }

    #[test]
    fn content_hash_json_is_plain_string() {
        let json = serde_json::to_string(&hash()).unwrap();
        assert_eq!(json, "\"9e107d9d372bb6826bd81d3542a419d6\"");
        assert!(serde_json::from_str::<ContentHash>("\"../x\"").is_err());
    }

    #[test]
    fn chunk_id_parses_index_from_last_separator() {
        let id = ChunkId::parse("abc-def-10").unwrap();
        assert_eq!(id.index(), 10);
        assert_eq!(id.to_string(), "abc-def-10");
    }

    #[test]
    fn chunk_id_rejects_unsafe_or_indexless_values() {
        for bad in ["", "abc", "abc-", "abc-x1", "abc-+1", "../abc-1", "a/b-1", "a\\b-1", ".abc-1"] {
            assert!(ChunkId::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn chunk_id_must_belong_to_its_content_hash() {
        let h = hash();
        let id = ChunkId::parse_for(&h, &format!("{h}-3")).unwrap();
        assert_eq!(id, h.chunk_id(3));

        for foreign in ["other-0".to_string(), format!("{h}x-0"), format!("x{h}-0"), format!("{h}-03")] {
            assert!(
                matches!(ChunkId::parse_for(&h, &foreign), Err(ProtocolError::ForeignChunkId { .. })),
                "{foreign:?} should be rejected"
            );
        }
        assert!(matches!(
            ChunkId::parse_for(&h, "../x-0"),
            Err(ProtocolError::InvalidChunkId(_))
        ));
    }

    #[test]
    fn chunk_id_indices_sort_numerically() {
        let h = hash();
        let mut ids: Vec<ChunkId> = [10, 2, 1, 0].iter().map(|&i| h.chunk_id(i)).collect();
        ids.sort_by_key(ChunkId::index);
        let order: Vec<u64> = ids.iter().map(ChunkId::index).collect();
        assert_eq!(order, vec![0, 1, 2, 10]);
    }

    #[test]
    fn outcome_wire_text() {
        assert_eq!(ChunkOutcome::FileExists.as_str(), "file exist");
        assert_eq!(ChunkOutcome::ChunkExists.as_str(), "chunk exist");
        assert_eq!(ChunkOutcome::Received.as_str(), "received file chunk");
        assert_eq!("chunk exist\n".parse::<ChunkOutcome>(), Ok(ChunkOutcome::ChunkExists));
        assert!("nope".parse::<ChunkOutcome>().is_err());
    }

    #[test]
    fn extension_of_filename() {
        assert_eq!(file_extension("movie.mp4"), ".mp4");
        assert_eq!(file_extension("archive.tar.gz"), ".gz");
        assert_eq!(file_extension("dir/sub/photo.JPG"), ".JPG");
        assert_eq!(file_extension("noext"), "");
        assert_eq!(file_extension("trailing."), "");
        assert_eq!(file_extension("weird.a/b"), "");
        assert_eq!(file_extension("bad.e x"), "");
    }

    #[test]
    fn hidden_artifacts() {
        assert!(is_hidden_artifact(".DS_Store"));
        assert!(is_hidden_artifact("Thumbs.db"));
        assert!(is_hidden_artifact("._abc-1"));
        assert!(!is_hidden_artifact("abc-1"));
    }
}
