//! Disk-backed object-bucket backend.
//!
//! Objects are keyed by an opaque string and stored beneath
//! `base_path/{shard}/{shard}/{key}`, where the shards are the first two
//! bytes of the key's MD5 — keeps per-directory file counts down. Writes go
//! through a temp file, fsync, and an atomic rename. This is the one backend
//! with true byte-range reads.

use crate::range::ByteRange;
use crate::storage::{BackendError, BlobBackend, ByteStream, FetchedBlob, Locator};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{self, ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_KEY_LEN: usize = 1024;

pub struct BucketBackend {
    base_path: PathBuf,
}

impl BucketBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Keys become file names directly, so path traversal vectors are
    /// rejected up front.
    fn ensure_key_safe(key: &str) -> Result<(), BackendError> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(BackendError::permanent("invalid object key"));
        }
        if key.contains('/') || key.contains("..") {
            return Err(BackendError::permanent("invalid object key"));
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(BackendError::permanent("invalid object key"));
        }
        Ok(())
    }

    /// Two-level shard identifiers from the key's MD5, as lowercase hex.
    fn shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Remove now-empty shard directories after a delete. Stops at the
    /// bucket root or the first non-empty directory.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobBackend for BucketBackend {
    fn supports_range(&self) -> bool {
        true
    }

    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        _content_type: &str,
    ) -> Result<Locator, BackendError> {
        Self::ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| BackendError::permanent("object path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        let write = async {
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, io::Error>(())
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err.into());
            }
        }

        Ok(Locator::keyed(key))
    }

    async fn fetch(
        &self,
        locator: &Locator,
        range: Option<ByteRange>,
    ) -> Result<FetchedBlob, BackendError> {
        Self::ensure_key_safe(&locator.key)?;
        let path = self.object_path(&locator.key);
        let mut file = File::open(&path).await?;
        let total_len = file.metadata().await?.len();

        let stream: ByteStream = match range {
            Some(range) => {
                file.seek(SeekFrom::Start(range.start)).await?;
                Box::pin(ReaderStream::new(file.take(range.len())))
            }
            None => Box::pin(ReaderStream::new(file)),
        };
        Ok(FetchedBlob {
            stream,
            total_len,
            content_type: None,
        })
    }

    async fn delete(&self, locator: &Locator) -> Result<bool, BackendError> {
        Self::ensure_key_safe(&locator.key)?;
        let path = self.object_path(&locator.key);
        let removed = match fs::remove_file(&path).await {
            Ok(_) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };
        if let Some(parent) = path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(removed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::collect_bytes;

    /// Temp bucket that cleans itself up when dropped.
    pub(crate) struct TempBucket {
        pub backend: BucketBackend,
        root: PathBuf,
    }

    impl TempBucket {
        pub fn new() -> Self {
            let root = std::env::temp_dir().join(format!("filebed-test-{}", Uuid::new_v4()));
            Self {
                backend: BucketBackend::new(&root),
                root,
            }
        }
    }

    impl Drop for TempBucket {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    #[tokio::test]
    async fn put_fetch_delete_roundtrip() {
        let bucket = TempBucket::new();
        let payload = Bytes::from_static(b"hello bucket backend");
        let locator = bucket
            .backend
            .put("greeting.txt", payload.clone(), "text/plain")
            .await
            .unwrap();

        let fetched = bucket.backend.fetch(&locator, None).await.unwrap();
        assert_eq!(fetched.total_len, payload.len() as u64);
        let bytes = collect_bytes(fetched.stream).await.unwrap();
        assert_eq!(bytes, payload);

        assert!(bucket.backend.delete(&locator).await.unwrap());
        assert!(!bucket.backend.delete(&locator).await.unwrap());
    }

    #[tokio::test]
    async fn native_range_reads_exact_slice() {
        let bucket = TempBucket::new();
        let payload: Vec<u8> = (0u8..=255).collect();
        let locator = bucket
            .backend
            .put("bytes.bin", Bytes::from(payload.clone()), "application/octet-stream")
            .await
            .unwrap();

        let fetched = bucket
            .backend
            .fetch(&locator, Some(ByteRange::new(10, 19)))
            .await
            .unwrap();
        assert_eq!(fetched.total_len, 256);
        let bytes = collect_bytes(fetched.stream).await.unwrap();
        assert_eq!(&bytes[..], &payload[10..=19]);
    }

    #[tokio::test]
    async fn overwrite_replaces_bytes() {
        let bucket = TempBucket::new();
        let locator = bucket
            .backend
            .put("same-key", Bytes::from_static(b"first"), "text/plain")
            .await
            .unwrap();
        bucket
            .backend
            .put("same-key", Bytes::from_static(b"second"), "text/plain")
            .await
            .unwrap();
        let fetched = bucket.backend.fetch(&locator, None).await.unwrap();
        let bytes = collect_bytes(fetched.stream).await.unwrap();
        assert_eq!(&bytes[..], b"second");
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let bucket = TempBucket::new();
        let err = bucket
            .backend
            .put("../escape", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Permanent { .. }));
    }
}
