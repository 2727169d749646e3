//! Storage backends.
//!
//! A file's bytes live in exactly one backend; the metadata store keeps only
//! locators. Backends implement [`BlobBackend`] and are selected per file by
//! its [`crate::models::file::StorageKind`] tag.

pub mod bucket;
pub mod chunked;
pub mod resolver;
pub mod telegram;

use crate::range::ByteRange;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Streamed blob content.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Where a blob's bytes can be found again.
///
/// `message_id` is populated only by the Telegram backend, which needs the
/// carrying message to delete an attachment; everywhere else it is `-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub key: String,
    pub message_id: i64,
}

impl Locator {
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message_id: -1,
        }
    }
}

/// Result of a fetch: the byte stream plus what the backend knows about it.
pub struct FetchedBlob {
    pub stream: ByteStream,
    /// Full size of the blob, regardless of any range applied.
    pub total_len: u64,
    pub content_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// Worth retrying: network hiccups and rate limits. `retry_after`
    /// carries a server-specified delay when one was given.
    #[error("transient backend failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },
    /// Not worth retrying: bad credentials, missing bucket, rejected input.
    #[error("backend failure: {message}")]
    Permanent { message: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BackendError {
    pub fn transient(message: impl Into<String>) -> Self {
        BackendError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        BackendError::Permanent {
            message: message.into(),
        }
    }
}

/// Uniform contract over the places bytes can live.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Whether `fetch` honors the `range` argument natively. Callers must
    /// fetch whole blobs and slice client-side when this is false.
    fn supports_range(&self) -> bool;

    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<Locator, BackendError>;

    async fn fetch(
        &self,
        locator: &Locator,
        range: Option<ByteRange>,
    ) -> Result<FetchedBlob, BackendError>;

    async fn delete(&self, locator: &Locator) -> Result<bool, BackendError>;
}

/// Drain a stream into one contiguous buffer.
pub async fn collect_bytes(mut stream: ByteStream) -> io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Wrap an already-materialized buffer as a stream.
pub fn stream_of(bytes: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move {
        Ok::<_, io::Error>(bytes)
    }))
}
