//! Represents one chunk of a file stored through a chunked backend.

use serde::{Deserialize, Serialize};

/// One entry of a file's chunk manifest.
///
/// Indices are dense `0..N-1` in upload order and the sum of `chunk_size`
/// over a manifest equals the parent record's `file_size`. Chunk rows are
/// immutable once written — a relocate writes fresh rows and detaches the
/// old ones instead of mutating bytes in place.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Surrogate key.
    pub id: i64,

    /// Parent `files.id`.
    pub file_id: i64,

    /// 0-based position within the logical file.
    pub chunk_index: i64,

    /// Byte length of this chunk.
    pub chunk_size: i64,

    /// Backend locator for this chunk's bytes.
    pub locator: String,

    /// Telegram message id for this chunk, `-1` when not applicable.
    pub message_id: i64,
}
