/// Upload-chunk endpoint (multipart POST).
pub const UPLOAD_CHUNK_PATH: &str = "/";

/// Verify endpoint (JSON POST).
pub const VERIFY_PATH: &str = "/verify";

/// Merge endpoint (JSON POST).
pub const MERGE_PATH: &str = "/merge";

/// Liveness endpoint.
pub const HEALTH_PATH: &str = "/health";

/// Default chunk size used by the uploader: 10 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Prefix of the per-hash directory holding not-yet-merged chunks.
pub const CHUNK_DIR_PREFIX: &str = "chunkDir_";

/// Separator between the digest and the index inside a chunk id.
pub const CHUNK_ID_SEPARATOR: char = '-';

/// Longest content hash accepted from a client.
pub const MAX_CONTENT_HASH_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Chunk upload responses (plain text bodies)
// ---------------------------------------------------------------------------

pub const RESPONSE_FILE_EXISTS: &str = "file exist";
pub const RESPONSE_CHUNK_EXISTS: &str = "chunk exist";
pub const RESPONSE_CHUNK_RECEIVED: &str = "received file chunk";
pub const RESPONSE_CHUNK_FAILED: &str = "process file chunk failed";

/// Message sent with a successful merge.
pub const MERGE_SUCCESS_MESSAGE: &str = "file merged success";

// ---------------------------------------------------------------------------
// Multipart field names
// ---------------------------------------------------------------------------

pub const FIELD_CHUNK_BLOB: &str = "chunkBlob";
pub const FIELD_CHUNK_ID: &str = "chunkId";
pub const FIELD_CONTENT_HASH: &str = "contentHash";
pub const FIELD_FILENAME: &str = "filename";

/// Older clients name the multipart fields `chunk`, `hash` and `fileHash`.
pub const LEGACY_FIELD_CHUNK_BLOB: &str = "chunk";
pub const LEGACY_FIELD_CHUNK_ID: &str = "hash";
pub const LEGACY_FIELD_CONTENT_HASH: &str = "fileHash";

/// File names dropped into directories by desktop operating systems.
pub const HIDDEN_ARTIFACTS: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];
