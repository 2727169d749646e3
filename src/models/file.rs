//! Represents a hosted file and the storage backend it lives in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which storage backend holds a file's bytes, and whether the payload was
/// split into chunks at upload time.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    /// Single attachment uploaded to the admin chat via the Telegram Bot API.
    Telegram,
    /// Single object in the disk-backed bucket store.
    Bucket,
    /// Oversized payload stored as multiple Telegram attachments.
    TelegramChunked,
    /// Oversized payload stored as multiple bucket objects.
    BucketChunked,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Telegram => "telegram",
            StorageKind::Bucket => "bucket",
            StorageKind::TelegramChunked => "telegram-chunked",
            StorageKind::BucketChunked => "bucket-chunked",
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(
            self,
            StorageKind::TelegramChunked | StorageKind::BucketChunked
        )
    }

    /// The single-blob kind for this backend family.
    pub fn base(&self) -> StorageKind {
        match self {
            StorageKind::Telegram | StorageKind::TelegramChunked => StorageKind::Telegram,
            StorageKind::Bucket | StorageKind::BucketChunked => StorageKind::Bucket,
        }
    }

    /// The chunked kind for this backend family.
    pub fn chunked(&self) -> StorageKind {
        match self.base() {
            StorageKind::Telegram => StorageKind::TelegramChunked,
            _ => StorageKind::BucketChunked,
        }
    }
}

impl FromStr for StorageKind {
    type Err = UnknownStorageKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(StorageKind::Telegram),
            "bucket" => Ok(StorageKind::Bucket),
            "telegram-chunked" => Ok(StorageKind::TelegramChunked),
            "bucket-chunked" => Ok(StorageKind::BucketChunked),
            other => Err(UnknownStorageKind(other.to_string())),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown storage kind `{0}`")]
pub struct UnknownStorageKind(pub String);

/// Metadata row for one hosted file.
///
/// Holds only locators — the payload bytes belong to whichever backend wrote
/// them. `(url)` is unique, as is `(chat_id, file_id)`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FileRecord {
    /// Surrogate key.
    pub id: i64,

    /// Canonical public URL the file is served under.
    pub url: String,

    /// Backend locator: Telegram attachment id, or the bucket object key.
    /// For chunked files this is the logical base key; per-chunk locators
    /// live in `file_chunks`.
    pub file_id: String,

    /// Telegram message id holding the attachment. `-1`/`0` mean not
    /// applicable (bucket family, or chunked parent rows).
    pub message_id: i64,

    /// Upload time as unix seconds.
    pub created_at: i64,

    /// Display file name as uploaded.
    pub file_name: Option<String>,

    /// Total payload size in bytes. For chunked files this equals the sum of
    /// the chunk sizes.
    pub file_size: i64,

    /// Best-effort MIME type.
    pub mime_type: Option<String>,

    /// Which backend (and mode) holds the bytes.
    pub storage: StorageKind,

    /// Owning category; `None` resolves to the default category.
    pub category_id: Option<i64>,

    /// Owner key of the uploader.
    pub chat_id: Option<String>,

    /// Caller-chosen URL suffix, when one was requested.
    pub custom_suffix: Option<String>,
}

impl FileRecord {
    /// The path component the file is addressed by, i.e. everything after
    /// the serving prefix in `url`.
    pub fn url_suffix(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }
}
