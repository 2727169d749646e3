//! Chunked storage over any backend.
//!
//! Payloads above the configured threshold are split into fixed-size chunks
//! at upload time, each stored independently under `<base>.part<NNNN>`. The
//! caller records one manifest row per chunk, in upload order; reassembly is
//! the resolver's job.

use crate::models::chunk::ChunkDescriptor;
use crate::storage::{BackendError, BlobBackend, Locator};
use bytes::Bytes;
use tracing::warn;

/// Outcome of storing one chunk; becomes a manifest row.
#[derive(Debug, Clone)]
pub struct ChunkPut {
    pub index: i64,
    pub size: i64,
    pub locator: Locator,
}

pub fn chunk_key(base: &str, index: usize) -> String {
    format!("{base}.part{index:04}")
}

/// Split and store sequentially, preserving upload order. `Bytes::slice` is
/// zero-copy, so splitting costs nothing beyond the uploads themselves.
pub async fn put_chunks(
    backend: &dyn BlobBackend,
    base_key: &str,
    bytes: &Bytes,
    content_type: &str,
    chunk_size: usize,
) -> Result<Vec<ChunkPut>, BackendError> {
    assert!(chunk_size > 0, "chunk size must be positive");
    let mut chunks = Vec::new();
    let mut offset = 0usize;
    let mut index = 0usize;
    while offset < bytes.len() {
        let end = (offset + chunk_size).min(bytes.len());
        let key = chunk_key(base_key, index);
        let locator = backend
            .put(&key, bytes.slice(offset..end), content_type)
            .await?;
        chunks.push(ChunkPut {
            index: index as i64,
            size: (end - offset) as i64,
            locator,
        });
        offset = end;
        index += 1;
    }
    Ok(chunks)
}

/// Best-effort removal of every chunk in a manifest; returns how many were
/// actually deleted. Failures are reported, not fatal — the metadata row is
/// the source of truth and is gone by the time this runs.
pub async fn delete_chunks(backend: &dyn BlobBackend, chunks: &[ChunkDescriptor]) -> usize {
    let mut removed = 0;
    for chunk in chunks {
        let locator = Locator {
            key: chunk.locator.clone(),
            message_id: chunk.message_id,
        };
        match backend.delete(&locator).await {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(err) => warn!(chunk = %chunk.locator, "chunk delete failed: {err}"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::bucket::tests::TempBucket;
    use crate::storage::collect_bytes;

    fn descriptor(put: &ChunkPut, file_id: i64) -> ChunkDescriptor {
        ChunkDescriptor {
            id: put.index + 1,
            file_id,
            chunk_index: put.index,
            chunk_size: put.size,
            locator: put.locator.key.clone(),
            message_id: put.locator.message_id,
        }
    }

    #[tokio::test]
    async fn splits_at_threshold_with_short_tail() {
        let bucket = TempBucket::new();
        let payload = Bytes::from((0..23u8).collect::<Vec<_>>());
        let chunks = put_chunks(&bucket.backend, "tail", &payload, "application/octet-stream", 10)
            .await
            .unwrap();
        assert_eq!(
            chunks.iter().map(|c| c.size).collect::<Vec<_>>(),
            vec![10, 10, 3]
        );
        assert_eq!(chunks[2].locator.key, "tail.part0002");
    }

    #[tokio::test]
    async fn chunks_concatenate_back_to_the_original() {
        let bucket = TempBucket::new();
        let payload = Bytes::from((0..997u32).map(|i| (i % 251) as u8).collect::<Vec<_>>());
        let chunks = put_chunks(&bucket.backend, "rt", &payload, "application/octet-stream", 128)
            .await
            .unwrap();

        let mut rebuilt = Vec::new();
        for chunk in &chunks {
            let fetched = bucket.backend.fetch(&chunk.locator, None).await.unwrap();
            rebuilt.extend_from_slice(&collect_bytes(fetched.stream).await.unwrap());
        }
        assert_eq!(rebuilt, payload);
    }

    #[tokio::test]
    async fn delete_walks_the_manifest() {
        let bucket = TempBucket::new();
        let payload = Bytes::from(vec![7u8; 64]);
        let puts = put_chunks(&bucket.backend, "del", &payload, "application/octet-stream", 16)
            .await
            .unwrap();
        let manifest: Vec<ChunkDescriptor> = puts.iter().map(|p| descriptor(p, 1)).collect();

        assert_eq!(delete_chunks(&bucket.backend, &manifest).await, 4);
        // Second pass finds nothing left.
        assert_eq!(delete_chunks(&bucket.backend, &manifest).await, 0);
    }
}
