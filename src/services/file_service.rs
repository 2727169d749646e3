//! FileService — core operations of the hosting service.
//!
//! Resolves public paths to metadata records, moves bytes in and out of the
//! storage backends, and keeps the metadata store authoritative throughout.
//! Backends and caches are injected at construction; handlers only ever see
//! this service.

use crate::cache::TtlCache;
use crate::meta::bootstrap::InitError;
use crate::meta::driver::MetaError;
use crate::meta::store::{MetaStore, NewFile, OwnerStats};
use crate::models::category::Category;
use crate::models::file::{FileRecord, StorageKind};
use crate::models::user_setting::UserSetting;
use crate::range::{self, RangePlan};
use crate::storage::bucket::BucketBackend;
use crate::storage::resolver::{self, ResolvedStream};
use crate::storage::telegram::TelegramBackend;
use crate::storage::{chunked, BackendError, BlobBackend, Locator, collect_bytes};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

const MAX_SUFFIX_LEN: usize = 128;
const SUFFIX_GENERATION_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Init(#[from] InitError),
    #[error(transparent)]
    Meta(#[from] MetaError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("no file matches `{0}`")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("the {0} backend is not configured")]
    BackendUnavailable(&'static str),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Everything needed to store one upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bytes: Bytes,
    pub file_name: String,
    pub content_type: String,
    pub chat_id: String,
    pub custom_suffix: Option<String>,
    pub category_id: Option<i64>,
    /// Override of the owner's preferred backend family.
    pub storage: Option<StorageKind>,
}

/// What serving a path resolves to.
#[derive(Debug)]
pub enum ServeOutcome {
    Stream {
        record: FileRecord,
        resolved: ResolvedStream,
    },
    /// The requested range cannot be satisfied against this total size.
    Unsatisfiable { total: u64 },
}

/// Per-owner snapshot: preferences, active category, aggregates.
#[derive(Debug, Serialize)]
pub struct OwnerOverview {
    pub storage: StorageKind,
    pub category: Option<String>,
    #[serde(flatten)]
    pub stats: OwnerStats,
}

#[derive(Clone)]
pub struct FileService {
    store: MetaStore,
    bucket: Arc<BucketBackend>,
    telegram: Option<Arc<TelegramBackend>>,
    file_cache: Arc<TtlCache<String, FileRecord>>,
    base_url: String,
    chunk_threshold: u64,
}

impl FileService {
    pub fn new(
        store: MetaStore,
        bucket: Arc<BucketBackend>,
        telegram: Option<Arc<TelegramBackend>>,
        file_cache: Arc<TtlCache<String, FileRecord>>,
        base_url: impl Into<String>,
        chunk_threshold: u64,
    ) -> Self {
        Self {
            store,
            bucket,
            telegram,
            file_cache,
            base_url: base_url.into(),
            chunk_threshold: chunk_threshold.max(1),
        }
    }

    pub fn store(&self) -> &MetaStore {
        &self.store
    }

    pub fn bucket(&self) -> &BucketBackend {
        &self.bucket
    }

    pub fn public_url(&self, suffix: &str) -> String {
        format!("{}/f/{}", self.base_url, suffix)
    }

    fn default_storage(&self) -> StorageKind {
        if self.telegram.is_some() {
            StorageKind::Telegram
        } else {
            StorageKind::Bucket
        }
    }

    fn backend_for(&self, kind: StorageKind) -> ServiceResult<&dyn BlobBackend> {
        match kind.base() {
            StorageKind::Bucket => Ok(self.bucket.as_ref()),
            _ => self
                .telegram
                .as_deref()
                .map(|t| t as &dyn BlobBackend)
                .ok_or(ServiceError::BackendUnavailable("telegram")),
        }
    }

    // --- upload ---

    pub async fn upload(&self, req: UploadRequest) -> ServiceResult<FileRecord> {
        if req.bytes.is_empty() {
            return Err(ServiceError::InvalidInput("empty upload".into()));
        }

        let setting = self
            .store
            .setting_for(&req.chat_id, self.default_storage())
            .await?;
        let base = req.storage.unwrap_or(setting.storage).base();
        let chunked_upload = req.bytes.len() as u64 > self.chunk_threshold;
        let kind = if chunked_upload { base.chunked() } else { base };
        let backend = self.backend_for(kind)?;

        let suffix = self.pick_suffix(&req).await?;
        let url = self.public_url(&suffix);

        let category_id = match req.category_id.or(setting.category_id) {
            Some(id) => Some(id),
            None => self.store.default_category().await?.map(|c| c.id),
        };

        let new_file = NewFile {
            url,
            file_id: String::new(), // filled per storage mode below
            message_id: -1,
            file_name: Some(req.file_name.clone()),
            file_size: req.bytes.len() as i64,
            mime_type: Some(req.content_type.clone()),
            storage: kind,
            category_id,
            chat_id: Some(req.chat_id.clone()),
            custom_suffix: req.custom_suffix.as_deref().map(str::to_string),
        };

        if chunked_upload {
            let puts = chunked::put_chunks(
                backend,
                &suffix,
                &req.bytes,
                &req.content_type,
                self.chunk_threshold as usize,
            )
            .await?;

            let record = match self
                .store
                .insert_file(NewFile {
                    file_id: suffix.clone(),
                    ..new_file
                })
                .await
            {
                Ok(record) => record,
                Err(err) => {
                    // The blobs are unreferenced without this row; take
                    // them back out before surfacing the failure.
                    let manifest = puts_as_manifest(&puts, 0);
                    chunked::delete_chunks(backend, &manifest).await;
                    return Err(err.into());
                }
            };
            for put in &puts {
                self.store
                    .insert_chunk(
                        record.id,
                        put.index,
                        put.size,
                        &put.locator.key,
                        put.locator.message_id,
                    )
                    .await?;
            }
            Ok(record)
        } else {
            let locator = backend.put(&suffix, req.bytes.clone(), &req.content_type).await?;
            match self
                .store
                .insert_file(NewFile {
                    file_id: locator.key.clone(),
                    message_id: locator.message_id,
                    ..new_file
                })
                .await
            {
                Ok(record) => Ok(record),
                Err(err) => {
                    if let Err(del) = backend.delete(&locator).await {
                        warn!("orphaned blob cleanup failed: {del}");
                    }
                    Err(err.into())
                }
            }
        }
    }

    async fn pick_suffix(&self, req: &UploadRequest) -> ServiceResult<String> {
        if let Some(custom) = &req.custom_suffix {
            let suffix = sanitize_suffix(custom)?;
            if self.store.file_by_url(&self.public_url(&suffix)).await?.is_some() {
                return Err(ServiceError::Conflict(format!(
                    "suffix `{suffix}` is already taken"
                )));
            }
            return Ok(suffix);
        }
        for _ in 0..SUFFIX_GENERATION_ATTEMPTS {
            let candidate = generate_suffix(&req.file_name);
            if self
                .store
                .file_by_url(&self.public_url(&candidate))
                .await?
                .is_none()
            {
                return Ok(candidate);
            }
        }
        Err(ServiceError::Conflict(
            "could not allocate a free url suffix".into(),
        ))
    }

    // --- serving ---

    /// Resolve a public path and open the requested (range of the) payload.
    pub async fn open_file(
        &self,
        path: &str,
        range_header: Option<&str>,
    ) -> ServiceResult<ServeOutcome> {
        let record = self.resolve_path(path).await?;
        let total = record.file_size.max(0) as u64;

        let wanted = match range::plan(range_header, total) {
            RangePlan::Unsatisfiable => return Ok(ServeOutcome::Unsatisfiable { total }),
            RangePlan::Partial(range) => Some(range),
            RangePlan::Full => None,
        };

        let backend = self.backend_for(record.storage)?;
        let chunks = if record.storage.is_chunked() {
            Some(self.store.chunks_for_file(record.id).await?)
        } else {
            None
        };
        let locator = Locator {
            key: record.file_id.clone(),
            message_id: record.message_id,
        };
        let resolved =
            resolver::open(backend, &locator, chunks.as_deref(), total, wanted).await?;
        Ok(ServeOutcome::Stream { record, resolved })
    }

    async fn resolve_path(&self, path: &str) -> ServiceResult<FileRecord> {
        let key = path.to_string();
        if let Some(hit) = self.file_cache.get(&key) {
            return Ok(hit);
        }
        let record = match self.store.file_by_url(&self.public_url(path)).await? {
            Some(record) => record,
            None => self
                .store
                .file_by_name(path)
                .await?
                .ok_or_else(|| ServiceError::NotFound(path.to_string()))?,
        };
        self.file_cache.insert(key, record.clone());
        Ok(record)
    }

    pub async fn file_by_id(&self, id: i64) -> ServiceResult<FileRecord> {
        self.store
            .file_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("file #{id}")))
    }

    pub async fn files_by_owner(&self, chat_id: &str) -> ServiceResult<Vec<FileRecord>> {
        Ok(self.store.files_by_owner(chat_id).await?)
    }

    pub async fn search_files(&self, needle: &str) -> ServiceResult<Vec<FileRecord>> {
        Ok(self.store.search_files(needle).await?)
    }

    // --- delete ---

    pub async fn delete_file(&self, id: i64) -> ServiceResult<FileRecord> {
        let record = self.file_by_id(id).await?;
        let backend = self.backend_for(record.storage)?;

        // Blob removal is best-effort: once the row is gone the store no
        // longer references these bytes, and that is what counts.
        if record.storage.is_chunked() {
            let chunks = self.store.chunks_for_file(id).await?;
            chunked::delete_chunks(backend, &chunks).await;
            self.store.delete_chunks(id).await?;
        } else {
            let locator = Locator {
                key: record.file_id.clone(),
                message_id: record.message_id,
            };
            if let Err(err) = backend.delete(&locator).await {
                warn!(file = id, "blob delete failed: {err}");
            }
        }

        self.store.delete_file_row(id).await?;
        self.file_cache.invalidate(&record.url_suffix().to_string());
        Ok(record)
    }

    // --- rename / relocate ---

    /// Change a file's public suffix. Bucket-family files are physically
    /// rekeyed write-before-delete; the chat transport only changes the URL.
    pub async fn relocate(&self, id: i64, new_suffix: &str) -> ServiceResult<FileRecord> {
        let record = self.file_by_id(id).await?;
        let suffix = sanitize_suffix(new_suffix)?;
        let new_url = self.public_url(&suffix);
        if new_url == record.url {
            return Ok(record);
        }

        if let Some(other) = self.store.file_by_url(&new_url).await? {
            if other.id != id {
                return Err(ServiceError::Conflict(format!(
                    "url suffix `{suffix}` is already taken"
                )));
            }
        }

        match record.storage.base() {
            StorageKind::Telegram => {
                // Bytes stay in the transport; only the public URL moves.
                self.store
                    .update_file_url(id, &new_url, Some(&suffix))
                    .await?;
            }
            _ => {
                if let Some(owner) = &record.chat_id {
                    if let Some(other) = self.store.file_by_locator(&suffix, owner).await? {
                        if other.id != id {
                            return Err(ServiceError::Conflict(format!(
                                "locator `{suffix}` is already taken"
                            )));
                        }
                    }
                }
                self.relocate_bucket_bytes(&record, &suffix, &new_url).await?;
            }
        }

        self.file_cache.invalidate(&record.url_suffix().to_string());
        self.file_cache.invalidate(&suffix.to_string());
        self.file_by_id(id).await
    }

    /// Fetch-and-recreate under the new key, metadata update, then old-key
    /// deletion — in that order. A failed recreate degrades to a URL-only
    /// update so the record stays resolvable with its stale physical key.
    async fn relocate_bucket_bytes(
        &self,
        record: &FileRecord,
        suffix: &str,
        new_url: &str,
    ) -> ServiceResult<()> {
        let backend = self.backend_for(record.storage)?;
        let content_type = record
            .mime_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let total = record.file_size.max(0) as u64;
        let old_locator = Locator {
            key: record.file_id.clone(),
            message_id: record.message_id,
        };

        if record.storage.is_chunked() {
            let old_chunks = self.store.chunks_for_file(record.id).await?;
            let rewritten = async {
                let resolved = resolver::open(
                    backend,
                    &old_locator,
                    Some(old_chunks.as_slice()),
                    total,
                    None,
                )
                .await?;
                let bytes = collect_bytes(resolved.stream).await?;
                chunked::put_chunks(
                    backend,
                    suffix,
                    &bytes,
                    &content_type,
                    self.chunk_threshold as usize,
                )
                .await
            }
            .await;

            match rewritten {
                Ok(puts) => {
                    self.store
                        .relocate_file_row(record.id, new_url, Some(suffix), suffix, -1)
                        .await?;
                    self.store.delete_chunks(record.id).await?;
                    for put in &puts {
                        self.store
                            .insert_chunk(
                                record.id,
                                put.index,
                                put.size,
                                &put.locator.key,
                                put.locator.message_id,
                            )
                            .await?;
                    }
                    chunked::delete_chunks(backend, &old_chunks).await;
                }
                Err(err) => {
                    warn!(file = record.id, "relocate copy failed, keeping old key: {err}");
                    self.store
                        .update_file_url(record.id, new_url, Some(suffix))
                        .await?;
                }
            }
        } else {
            let copied = async {
                let fetched = backend.fetch(&old_locator, None).await?;
                let bytes = collect_bytes(fetched.stream).await?;
                backend.put(suffix, bytes, &content_type).await
            }
            .await;

            match copied {
                Ok(new_locator) => {
                    self.store
                        .relocate_file_row(
                            record.id,
                            new_url,
                            Some(suffix),
                            &new_locator.key,
                            new_locator.message_id,
                        )
                        .await?;
                    if let Err(err) = backend.delete(&old_locator).await {
                        warn!(file = record.id, "old blob delete failed: {err}");
                    }
                }
                Err(err) => {
                    warn!(file = record.id, "relocate copy failed, keeping old key: {err}");
                    self.store
                        .update_file_url(record.id, new_url, Some(suffix))
                        .await?;
                }
            }
        }
        Ok(())
    }

    // --- categories ---

    pub async fn create_category(&self, name: &str) -> ServiceResult<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::InvalidInput("empty category name".into()));
        }
        match self.store.create_category(name).await {
            Ok(category) => Ok(category),
            Err(err) if err.is_unique_violation() => Err(ServiceError::Conflict(format!(
                "category `{name}` already exists"
            ))),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn list_categories(&self) -> ServiceResult<Vec<Category>> {
        Ok(self.store.list_categories().await?)
    }

    /// Delete a category, moving its files and settings to the default one.
    /// The default category itself can never be deleted.
    pub async fn delete_category(&self, id: i64) -> ServiceResult<()> {
        let default = self
            .store
            .default_category()
            .await?
            .ok_or_else(|| ServiceError::Conflict("default category missing".into()))?;
        if default.id == id {
            return Err(ServiceError::Conflict(
                "the default category cannot be deleted".into(),
            ));
        }
        if self.store.category_by_id(id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("category #{id}")));
        }

        self.store.reassign_category(default.id, Some(id)).await?;
        self.store.delete_category_row(id).await?;
        Ok(())
    }

    pub async fn set_file_category(&self, id: i64, category_id: i64) -> ServiceResult<FileRecord> {
        self.file_by_id(id).await?;
        if self.store.category_by_id(category_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("category #{category_id}")));
        }
        self.store.update_file_category(id, Some(category_id)).await?;
        self.file_by_id(id).await
    }

    // --- settings & stats ---

    pub async fn setting_for(&self, chat_id: &str) -> ServiceResult<UserSetting> {
        Ok(self
            .store
            .setting_for(chat_id, self.default_storage())
            .await?)
    }

    pub async fn set_preferences(
        &self,
        chat_id: &str,
        storage: Option<StorageKind>,
        category_id: Option<i64>,
    ) -> ServiceResult<UserSetting> {
        let mut setting = self.setting_for(chat_id).await?;
        if let Some(storage) = storage {
            if storage.base() == StorageKind::Telegram && self.telegram.is_none() {
                return Err(ServiceError::BackendUnavailable("telegram"));
            }
            setting.storage = storage;
        }
        if let Some(category_id) = category_id {
            if self.store.category_by_id(category_id).await?.is_none() {
                return Err(ServiceError::NotFound(format!("category #{category_id}")));
            }
            setting.category_id = Some(category_id);
        }
        self.store.update_setting(&setting).await?;
        Ok(setting)
    }

    /// Park or clear the owner's pending-input state.
    pub async fn set_waiting(
        &self,
        chat_id: &str,
        waiting_for: Option<String>,
        editing_file_id: Option<i64>,
    ) -> ServiceResult<UserSetting> {
        let mut setting = self.setting_for(chat_id).await?;
        match waiting_for {
            Some(tag) => {
                setting.waiting_for = Some(tag);
                setting.editing_file_id = editing_file_id;
            }
            None => setting.reset_interaction(),
        }
        self.store.update_setting(&setting).await?;
        Ok(setting)
    }

    pub async fn owner_overview(&self, chat_id: &str) -> ServiceResult<OwnerOverview> {
        let setting = self.setting_for(chat_id).await?;
        // Category name and aggregates are independent reads.
        let (category, stats) = tokio::try_join!(
            async {
                match setting.category_id {
                    Some(id) => self.store.category_by_id(id).await,
                    None => self.store.default_category().await,
                }
            },
            self.store.owner_stats(chat_id),
        )?;
        Ok(OwnerOverview {
            storage: setting.storage,
            category: category.map(|c| c.name),
            stats,
        })
    }
}

fn puts_as_manifest(puts: &[chunked::ChunkPut], file_id: i64) -> Vec<crate::models::chunk::ChunkDescriptor> {
    puts.iter()
        .map(|p| crate::models::chunk::ChunkDescriptor {
            id: 0,
            file_id,
            chunk_index: p.index,
            chunk_size: p.size,
            locator: p.locator.key.clone(),
            message_id: p.locator.message_id,
        })
        .collect()
}

/// Custom suffixes become both URLs and (for the bucket family) object
/// keys, so the character set is tight.
fn sanitize_suffix(raw: &str) -> ServiceResult<String> {
    let suffix = raw.trim();
    if suffix.is_empty() || suffix.len() > MAX_SUFFIX_LEN {
        return Err(ServiceError::InvalidInput("invalid url suffix".into()));
    }
    if suffix.starts_with('.') || suffix.contains("..") {
        return Err(ServiceError::InvalidInput("invalid url suffix".into()));
    }
    if !suffix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ServiceError::InvalidInput("invalid url suffix".into()));
    }
    Ok(suffix.to_string())
}

/// Short random stem, keeping the upload's extension when it has a sane one.
fn generate_suffix(file_name: &str) -> String {
    let stem = Uuid::new_v4().simple().to_string();
    let stem = &stem[..8];
    match file_name.rsplit_once('.') {
        Some((_, ext))
            if !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!("{stem}.{}", ext.to_ascii_lowercase())
        }
        _ => stem.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::memory::MemoryDriver;
    use crate::storage::collect_bytes;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Service over the emulator and a throwaway bucket directory.
    struct TestService {
        svc: FileService,
        root: PathBuf,
    }

    impl TestService {
        async fn new(chunk_threshold: u64) -> Self {
            let root = std::env::temp_dir().join(format!("filebed-svc-{}", Uuid::new_v4()));
            let store = MetaStore::new(Arc::new(MemoryDriver::new()));
            store.ensure_ready().await.expect("bootstrap");
            let svc = FileService::new(
                store,
                Arc::new(BucketBackend::new(&root)),
                None,
                Arc::new(TtlCache::new(Duration::from_secs(60), 64)),
                "http://host",
                chunk_threshold,
            );
            Self { svc, root }
        }
    }

    impl Drop for TestService {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    fn patterned(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
    }

    fn request(bytes: Bytes, suffix: Option<&str>) -> UploadRequest {
        UploadRequest {
            bytes,
            file_name: "sample.bin".into(),
            content_type: "application/octet-stream".into(),
            chat_id: "owner".into(),
            custom_suffix: suffix.map(str::to_string),
            category_id: None,
            storage: None,
        }
    }

    async fn body_of(outcome: ServeOutcome) -> (Option<crate::range::ByteRange>, u64, Bytes) {
        match outcome {
            ServeOutcome::Stream { resolved, .. } => (
                resolved.range,
                resolved.total_len,
                collect_bytes(resolved.stream).await.unwrap(),
            ),
            ServeOutcome::Unsatisfiable { .. } => panic!("expected a stream"),
        }
    }

    #[tokio::test]
    async fn upload_then_fetch_roundtrips() {
        let t = TestService::new(1 << 20).await;
        let payload = patterned(1024);
        let record = t.svc.upload(request(payload.clone(), Some("doc.bin"))).await.unwrap();
        assert_eq!(record.storage, StorageKind::Bucket);
        assert_eq!(record.url, "http://host/f/doc.bin");
        assert_eq!(record.category_id, Some(1));

        let outcome = t.svc.open_file("doc.bin", None).await.unwrap();
        let (range, total, body) = body_of(outcome).await;
        assert!(range.is_none());
        assert_eq!(total, 1024);
        assert_eq!(body, payload);
    }

    #[tokio::test]
    async fn oversized_upload_is_chunked_and_range_served() {
        let t = TestService::new(50).await;
        let payload = patterned(120);
        let record = t.svc.upload(request(payload.clone(), Some("big.bin"))).await.unwrap();
        assert_eq!(record.storage, StorageKind::BucketChunked);

        let chunks = t.svc.store().chunks_for_file(record.id).await.unwrap();
        assert_eq!(
            chunks.iter().map(|c| c.chunk_size).collect::<Vec<_>>(),
            vec![50, 50, 20]
        );
        assert_eq!(
            chunks.iter().map(|c| c.chunk_size).sum::<i64>(),
            record.file_size
        );

        // Straddles the first chunk boundary.
        let outcome = t
            .svc
            .open_file("big.bin", Some("bytes=48-52"))
            .await
            .unwrap();
        let (range, total, body) = body_of(outcome).await;
        assert_eq!(range, Some(crate::range::ByteRange::new(48, 52)));
        assert_eq!(total, 120);
        assert_eq!(&body[..], &payload[48..=52]);
    }

    #[tokio::test]
    async fn range_past_eof_is_unsatisfiable() {
        let t = TestService::new(1 << 20).await;
        t.svc.upload(request(patterned(100), Some("s.bin"))).await.unwrap();
        match t
            .svc
            .open_file("s.bin", Some("bytes=9999999999-"))
            .await
            .unwrap()
        {
            ServeOutcome::Unsatisfiable { total } => assert_eq!(total, 100),
            _ => panic!("expected 416 outcome"),
        }
    }

    #[tokio::test]
    async fn duplicate_suffix_conflicts() {
        let t = TestService::new(1 << 20).await;
        t.svc.upload(request(patterned(10), Some("same"))).await.unwrap();
        let err = t
            .svc
            .upload(request(patterned(10), Some("same")))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn relocate_preserves_bytes_and_frees_old_path() {
        let t = TestService::new(1 << 20).await;
        let payload = patterned(256);
        let record = t.svc.upload(request(payload.clone(), Some("old.bin"))).await.unwrap();

        let moved = t.svc.relocate(record.id, "new.bin").await.unwrap();
        assert_eq!(moved.url, "http://host/f/new.bin");
        assert_eq!(moved.file_id, "new.bin");

        let (_, _, body) = body_of(t.svc.open_file("new.bin", None).await.unwrap()).await;
        assert_eq!(body, payload);
        assert!(matches!(
            t.svc.open_file("old.bin", None).await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn relocate_chunked_rewrites_manifest() {
        let t = TestService::new(40).await;
        let payload = patterned(100);
        let record = t.svc.upload(request(payload.clone(), Some("c-old"))).await.unwrap();

        let moved = t.svc.relocate(record.id, "c-new").await.unwrap();
        assert_eq!(moved.storage, StorageKind::BucketChunked);
        let chunks = t.svc.store().chunks_for_file(record.id).await.unwrap();
        assert!(chunks.iter().all(|c| c.locator.starts_with("c-new.part")));

        let (_, _, body) = body_of(t.svc.open_file("c-new", None).await.unwrap()).await;
        assert_eq!(body, payload);
    }

    #[tokio::test]
    async fn relocate_onto_taken_suffix_conflicts() {
        let t = TestService::new(1 << 20).await;
        t.svc.upload(request(patterned(10), Some("taken"))).await.unwrap();
        let record = t.svc.upload(request(patterned(10), Some("mine"))).await.unwrap();
        let err = t.svc.relocate(record.id, "taken").await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_removes_record_and_chunks() {
        let t = TestService::new(30).await;
        let record = t.svc.upload(request(patterned(100), Some("gone"))).await.unwrap();
        t.svc.delete_file(record.id).await.unwrap();

        assert!(matches!(
            t.svc.open_file("gone", None).await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
        assert!(t.svc.store().chunks_for_file(record.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn default_category_is_protected() {
        let t = TestService::new(1 << 20).await;
        let default = t.svc.store().default_category().await.unwrap().unwrap();
        let err = t.svc.delete_category(default.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn category_delete_reassigns_to_default() {
        let t = TestService::new(1 << 20).await;
        let category = t.svc.create_category("videos").await.unwrap();
        let mut req = request(patterned(10), Some("vid"));
        req.category_id = Some(category.id);
        let record = t.svc.upload(req).await.unwrap();
        assert_eq!(record.category_id, Some(category.id));
        t.svc
            .set_preferences("owner", None, Some(category.id))
            .await
            .unwrap();

        t.svc.delete_category(category.id).await.unwrap();
        let default = t.svc.store().default_category().await.unwrap().unwrap();
        let reread = t.svc.file_by_id(record.id).await.unwrap();
        assert_eq!(reread.category_id, Some(default.id));
        let setting = t.svc.setting_for("owner").await.unwrap();
        assert_eq!(setting.category_id, Some(default.id));
    }

    #[tokio::test]
    async fn overview_combines_setting_and_stats() {
        let t = TestService::new(1 << 20).await;
        t.svc.upload(request(patterned(100), Some("a"))).await.unwrap();
        t.svc.upload(request(patterned(50), Some("b"))).await.unwrap();

        let overview = t.svc.owner_overview("owner").await.unwrap();
        assert_eq!(overview.stats.file_count, 2);
        assert_eq!(overview.stats.total_bytes, 150);
        assert_eq!(
            overview.category.as_deref(),
            Some(crate::models::category::DEFAULT_CATEGORY_NAME)
        );
    }

    #[tokio::test]
    async fn waiting_state_parks_and_clears() {
        let t = TestService::new(1 << 20).await;
        let parked = t
            .svc
            .set_waiting("owner", Some("new_suffix".into()), Some(3))
            .await
            .unwrap();
        assert_eq!(parked.waiting_for.as_deref(), Some("new_suffix"));
        assert_eq!(parked.editing_file_id, Some(3));

        let idle = t.svc.set_waiting("owner", None, None).await.unwrap();
        assert!(idle.waiting_for.is_none());
        assert!(idle.editing_file_id.is_none());
    }

    #[test]
    fn suffix_sanitizer_rejects_traversal() {
        assert!(sanitize_suffix("ok-name.bin").is_ok());
        assert!(sanitize_suffix("../etc/passwd").is_err());
        assert!(sanitize_suffix(".hidden").is_err());
        assert!(sanitize_suffix("a b").is_err());
        assert!(sanitize_suffix("").is_err());
    }

    #[test]
    fn generated_suffixes_keep_sane_extensions() {
        let s = generate_suffix("movie.MP4");
        assert!(s.ends_with(".mp4"));
        let s = generate_suffix("no-extension");
        assert!(!s.contains('.'));
    }
}
