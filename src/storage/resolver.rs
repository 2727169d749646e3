//! Range-streaming resolver.
//!
//! Maps a requested byte range onto a single blob or a chunk manifest and
//! produces the stream to send downstream. Chunk fetches run through a
//! bounded concurrent pool but are reassembled in strict index order before
//! any byte is emitted — emission order is an invariant, not an
//! optimization. Chunked responses are fully assembled before headers go
//! out, so a failed chunk fetch surfaces as an error response instead of a
//! torn body.

use crate::models::chunk::ChunkDescriptor;
use crate::range::ByteRange;
use crate::storage::{
    collect_bytes, stream_of, BackendError, BlobBackend, ByteStream, FetchedBlob, Locator,
};
use futures::stream::{self, StreamExt, TryStreamExt};

/// How many chunk fetches may be in flight for one request.
const CHUNK_FETCH_CONCURRENCY: usize = 4;

/// A stream ready to be written out, with the numbers the HTTP layer needs.
pub struct ResolvedStream {
    /// The slice actually served; `None` means the whole payload.
    pub range: Option<ByteRange>,
    /// Full logical size of the file.
    pub total_len: u64,
    /// Exact number of body bytes in `stream`.
    pub content_length: u64,
    pub stream: ByteStream,
}

impl std::fmt::Debug for ResolvedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedStream")
            .field("range", &self.range)
            .field("total_len", &self.total_len)
            .field("content_length", &self.content_length)
            .field("stream", &"<ByteStream>")
            .finish()
    }
}

/// One chunk's contribution to a requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkSlice {
    /// Position in the manifest.
    manifest_index: usize,
    /// Bytes to skip at the front of the chunk.
    skip: u64,
    /// Bytes to emit from this chunk.
    take: u64,
}

/// Walk the manifest's running prefix sum and pick the chunks intersecting
/// `[start, end]`, with the exact slice needed from each.
fn select_chunks(chunks: &[ChunkDescriptor], range: ByteRange) -> Vec<ChunkSlice> {
    let mut selected = Vec::new();
    let mut chunk_start = 0u64;
    for (i, chunk) in chunks.iter().enumerate() {
        let len = chunk.chunk_size.max(0) as u64;
        if len == 0 {
            continue;
        }
        let chunk_end = chunk_start + len - 1;
        if chunk_end >= range.start && chunk_start <= range.end {
            let skip = range.start.saturating_sub(chunk_start);
            let last = range.end.min(chunk_end);
            selected.push(ChunkSlice {
                manifest_index: i,
                skip,
                take: last - (chunk_start + skip) + 1,
            });
        }
        if chunk_end >= range.end {
            break;
        }
        chunk_start += len;
    }
    selected
}

/// Fetch one chunk slice. Backends with native ranges get asked for exactly
/// the needed bytes; others return the whole chunk, sliced here.
async fn fetch_slice(
    backend: &dyn BlobBackend,
    chunk: &ChunkDescriptor,
    slice: ChunkSlice,
) -> Result<bytes::Bytes, BackendError> {
    let locator = Locator {
        key: chunk.locator.clone(),
        message_id: chunk.message_id,
    };
    let len = chunk.chunk_size.max(0) as u64;
    let partial = slice.skip > 0 || slice.take < len;

    if partial && backend.supports_range() {
        let fetched = backend
            .fetch(
                &locator,
                Some(ByteRange::new(slice.skip, slice.skip + slice.take - 1)),
            )
            .await?;
        return Ok(collect_bytes(fetched.stream).await?);
    }

    let fetched = backend.fetch(&locator, None).await?;
    let bytes = collect_bytes(fetched.stream).await?;
    if partial {
        let from = slice.skip.min(bytes.len() as u64) as usize;
        let to = (slice.skip + slice.take).min(bytes.len() as u64) as usize;
        Ok(bytes.slice(from..to))
    } else {
        Ok(bytes)
    }
}

/// Open a stream for `range` (or the whole payload) over a single blob or a
/// chunk manifest.
pub async fn open(
    backend: &dyn BlobBackend,
    locator: &Locator,
    chunks: Option<&[ChunkDescriptor]>,
    total_len: u64,
    range: Option<ByteRange>,
) -> Result<ResolvedStream, BackendError> {
    match chunks {
        Some(manifest) => open_chunked(backend, manifest, total_len, range).await,
        None => open_single(backend, locator, total_len, range).await,
    }
}

async fn open_single(
    backend: &dyn BlobBackend,
    locator: &Locator,
    total_len: u64,
    range: Option<ByteRange>,
) -> Result<ResolvedStream, BackendError> {
    match range {
        None => {
            let FetchedBlob { stream, .. } = backend.fetch(locator, None).await?;
            Ok(ResolvedStream {
                range: None,
                total_len,
                content_length: total_len,
                stream,
            })
        }
        Some(range) if backend.supports_range() => {
            let FetchedBlob { stream, .. } = backend.fetch(locator, Some(range)).await?;
            Ok(ResolvedStream {
                range: Some(range),
                total_len,
                content_length: range.len(),
                stream,
            })
        }
        // No native ranges: fetch the whole blob and slice in memory.
        Some(range) => {
            let FetchedBlob { stream, .. } = backend.fetch(locator, None).await?;
            let bytes = collect_bytes(stream).await?;
            let from = range.start.min(bytes.len() as u64) as usize;
            let to = (range.end + 1).min(bytes.len() as u64) as usize;
            let slice = bytes.slice(from..to);
            Ok(ResolvedStream {
                range: Some(range),
                total_len,
                content_length: slice.len() as u64,
                stream: stream_of(slice),
            })
        }
    }
}

async fn open_chunked(
    backend: &dyn BlobBackend,
    manifest: &[ChunkDescriptor],
    total_len: u64,
    range: Option<ByteRange>,
) -> Result<ResolvedStream, BackendError> {
    if total_len == 0 {
        return Ok(ResolvedStream {
            range: None,
            total_len: 0,
            content_length: 0,
            stream: stream_of(bytes::Bytes::new()),
        });
    }

    let wanted = range.unwrap_or_else(|| ByteRange::new(0, total_len - 1));
    let selected = select_chunks(manifest, wanted);

    // Concurrent fetches, tagged with their position; reassembled in index
    // order below before anything is emitted.
    let mut parts: Vec<(usize, bytes::Bytes)> = stream::iter(selected.into_iter().map(|slice| {
        let chunk = &manifest[slice.manifest_index];
        async move {
            let bytes = fetch_slice(backend, chunk, slice).await?;
            Ok::<_, BackendError>((slice.manifest_index, bytes))
        }
    }))
    .buffer_unordered(CHUNK_FETCH_CONCURRENCY)
    .try_collect()
    .await?;
    parts.sort_by_key(|(index, _)| *index);

    let content_length: u64 = parts.iter().map(|(_, b)| b.len() as u64).sum();
    let stream: ByteStream = Box::pin(stream::iter(
        parts
            .into_iter()
            .map(|(_, bytes)| Ok::<_, std::io::Error>(bytes)),
    ));
    Ok(ResolvedStream {
        range,
        total_len,
        content_length,
        stream,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::bucket::tests::TempBucket;
    use crate::storage::chunked::{self, ChunkPut};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn manifest_from(puts: &[ChunkPut]) -> Vec<ChunkDescriptor> {
        puts.iter()
            .map(|p| ChunkDescriptor {
                id: p.index + 1,
                file_id: 1,
                chunk_index: p.index,
                chunk_size: p.size,
                locator: p.locator.key.clone(),
                message_id: p.locator.message_id,
            })
            .collect()
    }

    fn patterned(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
    }

    /// Whole-blob-only backend standing in for the chat transport.
    struct WholeBlobBackend {
        blobs: Mutex<HashMap<String, Bytes>>,
    }

    impl WholeBlobBackend {
        fn new() -> Self {
            Self {
                blobs: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl BlobBackend for WholeBlobBackend {
        fn supports_range(&self) -> bool {
            false
        }

        async fn put(
            &self,
            key: &str,
            bytes: Bytes,
            _content_type: &str,
        ) -> Result<Locator, BackendError> {
            self.blobs.lock().unwrap().insert(key.to_string(), bytes);
            Ok(Locator::keyed(key))
        }

        async fn fetch(
            &self,
            locator: &Locator,
            _range: Option<ByteRange>,
        ) -> Result<FetchedBlob, BackendError> {
            let bytes = self
                .blobs
                .lock()
                .unwrap()
                .get(&locator.key)
                .cloned()
                .ok_or_else(|| BackendError::permanent("no such blob"))?;
            Ok(FetchedBlob {
                total_len: bytes.len() as u64,
                stream: stream_of(bytes),
                content_type: None,
            })
        }

        async fn delete(&self, locator: &Locator) -> Result<bool, BackendError> {
            Ok(self.blobs.lock().unwrap().remove(&locator.key).is_some())
        }
    }

    #[test]
    fn selection_skips_and_slices_correctly() {
        let manifest: Vec<ChunkDescriptor> = [10i64, 10, 10]
            .iter()
            .enumerate()
            .map(|(i, len)| ChunkDescriptor {
                id: i as i64,
                file_id: 1,
                chunk_index: i as i64,
                chunk_size: *len,
                locator: format!("k.part{i:04}"),
                message_id: -1,
            })
            .collect();

        // Entirely inside the middle chunk.
        let selected = select_chunks(&manifest, ByteRange::new(12, 17));
        assert_eq!(
            selected,
            vec![ChunkSlice {
                manifest_index: 1,
                skip: 2,
                take: 6
            }]
        );

        // Straddling all three.
        let selected = select_chunks(&manifest, ByteRange::new(9, 20));
        assert_eq!(selected.len(), 3);
        assert_eq!(selected[0].skip, 9);
        assert_eq!(selected[0].take, 1);
        assert_eq!(selected[2].skip, 0);
        assert_eq!(selected[2].take, 1);
    }

    #[tokio::test]
    async fn range_across_chunk_boundary_is_byte_exact() {
        let bucket = TempBucket::new();
        let payload = patterned(8_388_608);
        let puts = chunked::put_chunks(
            &bucket.backend,
            "video.mp4",
            &payload,
            "video/mp4",
            5_000_000,
        )
        .await
        .unwrap();
        assert_eq!(puts.len(), 2);
        assert_eq!(puts[0].size, 5_000_000);
        assert_eq!(puts[1].size, 3_388_608);
        let manifest = manifest_from(&puts);

        let resolved = open(
            &bucket.backend,
            &Locator::keyed("video.mp4"),
            Some(&manifest),
            payload.len() as u64,
            Some(ByteRange::new(4_999_998, 5_000_002)),
        )
        .await
        .unwrap();

        assert_eq!(resolved.content_length, 5);
        assert_eq!(resolved.total_len, 8_388_608);
        let body = collect_bytes(resolved.stream).await.unwrap();
        assert_eq!(&body[..], &payload[4_999_998..=5_000_002]);
    }

    #[tokio::test]
    async fn full_chunked_read_reconstructs_the_upload() {
        let bucket = TempBucket::new();
        let payload = patterned(4_097);
        let puts = chunked::put_chunks(&bucket.backend, "doc.pdf", &payload, "application/pdf", 512)
            .await
            .unwrap();
        let manifest = manifest_from(&puts);

        let resolved = open(
            &bucket.backend,
            &Locator::keyed("doc.pdf"),
            Some(&manifest),
            payload.len() as u64,
            None,
        )
        .await
        .unwrap();
        assert_eq!(resolved.content_length, payload.len() as u64);
        let body = collect_bytes(resolved.stream).await.unwrap();
        assert_eq!(body, payload);
    }

    #[tokio::test]
    async fn many_small_chunks_come_back_in_index_order() {
        let bucket = TempBucket::new();
        let payload = patterned(1_000);
        let puts = chunked::put_chunks(&bucket.backend, "tiny", &payload, "text/plain", 13)
            .await
            .unwrap();
        let manifest = manifest_from(&puts);

        let resolved = open(
            &bucket.backend,
            &Locator::keyed("tiny"),
            Some(&manifest),
            payload.len() as u64,
            Some(ByteRange::new(5, 994)),
        )
        .await
        .unwrap();
        let body = collect_bytes(resolved.stream).await.unwrap();
        assert_eq!(&body[..], &payload[5..=994]);
    }

    #[tokio::test]
    async fn sliced_in_memory_when_backend_lacks_ranges() {
        let backend = WholeBlobBackend::new();
        let payload = patterned(100);
        let locator = backend
            .put("blob", payload.clone(), "application/octet-stream")
            .await
            .unwrap();

        let resolved = open(
            &backend,
            &locator,
            None,
            payload.len() as u64,
            Some(ByteRange::new(40, 49)),
        )
        .await
        .unwrap();
        assert_eq!(resolved.content_length, 10);
        let body = collect_bytes(resolved.stream).await.unwrap();
        assert_eq!(&body[..], &payload[40..=49]);
    }

    #[tokio::test]
    async fn failed_chunk_fetch_fails_the_whole_request() {
        let backend = WholeBlobBackend::new();
        let manifest = vec![ChunkDescriptor {
            id: 1,
            file_id: 1,
            chunk_index: 0,
            chunk_size: 10,
            locator: "missing.part0000".into(),
            message_id: -1,
        }];
        let err = open(&backend, &Locator::keyed("missing"), Some(&manifest), 10, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Permanent { .. }));
    }
}
