//! Typed access to the metadata store.
//!
//! Every statement the service issues is a constant here, so the emulator's
//! enumerated intent set and the real driver always see the same shapes.
//! Rows are mapped into the model types; corrupted rows (missing columns,
//! unknown storage tags) are treated as absent rather than panicking.

use crate::meta::bootstrap::{self, InitError};
use crate::meta::driver::{Meta, MetaDriver, MetaError, Row, SqlValue};
use crate::models::category::{Category, DEFAULT_CATEGORY_NAME};
use crate::models::chunk::ChunkDescriptor;
use crate::models::file::{FileRecord, StorageKind};
use crate::models::user_setting::UserSetting;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

const FILE_COLS: &str = "id, url, file_id, message_id, created_at, file_name, file_size, \
                         mime_type, storage_type, category_id, chat_id, custom_suffix";

const CATEGORY_COLS: &str = "id, name, created_at";

const CHUNK_COLS: &str = "id, file_id, chunk_index, chunk_size, locator, message_id";

const SETTING_COLS: &str = "chat_id, storage_type, category_id, waiting_for, editing_file_id";

/// Column values for a file row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub url: String,
    pub file_id: String,
    pub message_id: i64,
    pub file_name: Option<String>,
    pub file_size: i64,
    pub mime_type: Option<String>,
    pub storage: StorageKind,
    pub category_id: Option<i64>,
    pub chat_id: Option<String>,
    pub custom_suffix: Option<String>,
}

/// Aggregates for one owner.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct OwnerStats {
    pub file_count: i64,
    pub total_bytes: i64,
}

#[derive(Clone)]
pub struct MetaStore {
    meta: Meta,
}

impl MetaStore {
    pub fn new(driver: Arc<dyn MetaDriver>) -> Self {
        Self {
            meta: Meta::new(driver),
        }
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub async fn ensure_ready(&self) -> Result<(), InitError> {
        bootstrap::ensure_ready(&self.meta).await
    }

    // --- categories ---

    pub async fn create_category(&self, name: &str) -> Result<Category, MetaError> {
        let created_at = Utc::now().timestamp();
        let run = self
            .meta
            .prepare("INSERT INTO categories (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(created_at)
            .run()
            .await?;
        Ok(Category {
            id: run.last_insert_id,
            name: name.to_string(),
            created_at,
        })
    }

    pub async fn category_by_name(&self, name: &str) -> Result<Option<Category>, MetaError> {
        let row = self
            .meta
            .prepare(format!(
                "SELECT {CATEGORY_COLS} FROM categories WHERE name = ?"
            ))
            .bind(name)
            .first()
            .await?;
        Ok(row.as_ref().and_then(category_from_row))
    }

    pub async fn category_by_id(&self, id: i64) -> Result<Option<Category>, MetaError> {
        let row = self
            .meta
            .prepare(format!("SELECT {CATEGORY_COLS} FROM categories WHERE id = ?"))
            .bind(id)
            .first()
            .await?;
        Ok(row.as_ref().and_then(category_from_row))
    }

    pub async fn default_category(&self) -> Result<Option<Category>, MetaError> {
        self.category_by_name(DEFAULT_CATEGORY_NAME).await
    }

    pub async fn list_categories(&self) -> Result<Vec<Category>, MetaError> {
        let rows = self
            .meta
            .prepare(format!(
                "SELECT {CATEGORY_COLS} FROM categories ORDER BY id ASC"
            ))
            .all()
            .await?;
        Ok(rows.iter().filter_map(category_from_row).collect())
    }

    pub async fn delete_category_row(&self, id: i64) -> Result<bool, MetaError> {
        let run = self
            .meta
            .prepare("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .run()
            .await?;
        Ok(run.rows_affected > 0)
    }

    /// Move files and settings off a category (or off NULL) onto `to`.
    pub async fn reassign_category(&self, to: i64, from: Option<i64>) -> Result<(), MetaError> {
        match from {
            Some(from) => {
                self.meta
                    .prepare("UPDATE files SET category_id = ? WHERE category_id = ?")
                    .bind(to)
                    .bind(from)
                    .run()
                    .await?;
                self.meta
                    .prepare("UPDATE user_settings SET category_id = ? WHERE category_id = ?")
                    .bind(to)
                    .bind(from)
                    .run()
                    .await?;
            }
            None => {
                self.meta
                    .prepare("UPDATE files SET category_id = ? WHERE category_id IS NULL")
                    .bind(to)
                    .run()
                    .await?;
                self.meta
                    .prepare("UPDATE user_settings SET category_id = ? WHERE category_id IS NULL")
                    .bind(to)
                    .run()
                    .await?;
            }
        }
        Ok(())
    }

    // --- files ---

    pub async fn insert_file(&self, new: NewFile) -> Result<FileRecord, MetaError> {
        let created_at = Utc::now().timestamp();
        let run = self
            .meta
            .prepare(
                "INSERT INTO files (url, file_id, message_id, created_at, file_name, file_size, \
                 mime_type, storage_type, category_id, chat_id, custom_suffix) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(new.url.clone())
            .bind(new.file_id.clone())
            .bind(new.message_id)
            .bind(created_at)
            .bind(new.file_name.clone())
            .bind(new.file_size)
            .bind(new.mime_type.clone())
            .bind(new.storage.as_str())
            .bind(new.category_id)
            .bind(new.chat_id.clone())
            .bind(new.custom_suffix.clone())
            .run()
            .await?;

        Ok(FileRecord {
            id: run.last_insert_id,
            url: new.url,
            file_id: new.file_id,
            message_id: new.message_id,
            created_at,
            file_name: new.file_name,
            file_size: new.file_size,
            mime_type: new.mime_type,
            storage: new.storage,
            category_id: new.category_id,
            chat_id: new.chat_id,
            custom_suffix: new.custom_suffix,
        })
    }

    pub async fn file_by_id(&self, id: i64) -> Result<Option<FileRecord>, MetaError> {
        let row = self
            .meta
            .prepare(format!("SELECT {FILE_COLS} FROM files WHERE id = ?"))
            .bind(id)
            .first()
            .await?;
        Ok(row.as_ref().and_then(file_from_row))
    }

    pub async fn file_by_url(&self, url: &str) -> Result<Option<FileRecord>, MetaError> {
        let row = self
            .meta
            .prepare(format!("SELECT {FILE_COLS} FROM files WHERE url = ?"))
            .bind(url)
            .first()
            .await?;
        Ok(row.as_ref().and_then(file_from_row))
    }

    pub async fn file_by_locator(
        &self,
        file_id: &str,
        chat_id: &str,
    ) -> Result<Option<FileRecord>, MetaError> {
        let row = self
            .meta
            .prepare(format!(
                "SELECT {FILE_COLS} FROM files WHERE file_id = ? AND chat_id = ?"
            ))
            .bind(file_id)
            .bind(chat_id)
            .first()
            .await?;
        Ok(row.as_ref().and_then(file_from_row))
    }

    pub async fn file_by_name(&self, name: &str) -> Result<Option<FileRecord>, MetaError> {
        let row = self
            .meta
            .prepare(format!("SELECT {FILE_COLS} FROM files WHERE file_name = ?"))
            .bind(name)
            .first()
            .await?;
        Ok(row.as_ref().and_then(file_from_row))
    }

    /// Resolve an owner's file by display name or by the trailing path
    /// component of its URL.
    pub async fn file_by_suffix_or_name(
        &self,
        needle: &str,
        chat_id: &str,
    ) -> Result<Option<FileRecord>, MetaError> {
        let row = self
            .meta
            .prepare(format!(
                "SELECT {FILE_COLS} FROM files \
                 WHERE (file_name = ? OR url LIKE ?) AND chat_id = ?"
            ))
            .bind(needle)
            .bind(format!("%/{needle}"))
            .bind(chat_id)
            .first()
            .await?;
        Ok(row.as_ref().and_then(file_from_row))
    }

    pub async fn files_by_owner(&self, chat_id: &str) -> Result<Vec<FileRecord>, MetaError> {
        let rows = self
            .meta
            .prepare(format!(
                "SELECT {FILE_COLS} FROM files WHERE chat_id = ? ORDER BY created_at DESC"
            ))
            .bind(chat_id)
            .all()
            .await?;
        Ok(rows.iter().filter_map(file_from_row).collect())
    }

    pub async fn search_files(&self, needle: &str) -> Result<Vec<FileRecord>, MetaError> {
        let rows = self
            .meta
            .prepare(format!(
                "SELECT {FILE_COLS} FROM files WHERE LOWER(file_name) LIKE ? \
                 ORDER BY created_at DESC"
            ))
            .bind(format!("%{}%", needle.to_lowercase()))
            .all()
            .await?;
        Ok(rows.iter().filter_map(file_from_row).collect())
    }

    pub async fn owner_stats(&self, chat_id: &str) -> Result<OwnerStats, MetaError> {
        let row = self
            .meta
            .prepare(
                "SELECT COUNT(*) AS file_count, COALESCE(SUM(file_size), 0) AS total_bytes \
                 FROM files WHERE chat_id = ?",
            )
            .bind(chat_id)
            .first()
            .await?;
        Ok(row
            .map(|r| OwnerStats {
                file_count: r.integer("file_count").unwrap_or(0),
                total_bytes: r.integer("total_bytes").unwrap_or(0),
            })
            .unwrap_or_default())
    }

    pub async fn update_file_url(
        &self,
        id: i64,
        url: &str,
        custom_suffix: Option<&str>,
    ) -> Result<(), MetaError> {
        self.meta
            .prepare("UPDATE files SET url = ?, custom_suffix = ? WHERE id = ?")
            .bind(url)
            .bind(custom_suffix.map(str::to_string))
            .bind(id)
            .run()
            .await?;
        Ok(())
    }

    pub async fn update_file_category(
        &self,
        id: i64,
        category_id: Option<i64>,
    ) -> Result<(), MetaError> {
        self.meta
            .prepare("UPDATE files SET category_id = ? WHERE id = ?")
            .bind(category_id)
            .bind(id)
            .run()
            .await?;
        Ok(())
    }

    pub async fn update_file_locator(
        &self,
        id: i64,
        file_id: &str,
        message_id: i64,
    ) -> Result<(), MetaError> {
        self.meta
            .prepare("UPDATE files SET file_id = ?, message_id = ? WHERE id = ?")
            .bind(file_id)
            .bind(message_id)
            .bind(id)
            .run()
            .await?;
        Ok(())
    }

    /// One-shot URL + locator update used by the relocate workflow.
    pub async fn relocate_file_row(
        &self,
        id: i64,
        url: &str,
        custom_suffix: Option<&str>,
        file_id: &str,
        message_id: i64,
    ) -> Result<(), MetaError> {
        self.meta
            .prepare(
                "UPDATE files SET url = ?, custom_suffix = ?, file_id = ?, message_id = ? \
                 WHERE id = ?",
            )
            .bind(url)
            .bind(custom_suffix.map(str::to_string))
            .bind(file_id)
            .bind(message_id)
            .bind(id)
            .run()
            .await?;
        Ok(())
    }

    pub async fn delete_file_row(&self, id: i64) -> Result<bool, MetaError> {
        let run = self
            .meta
            .prepare("DELETE FROM files WHERE id = ?")
            .bind(id)
            .run()
            .await?;
        Ok(run.rows_affected > 0)
    }

    // --- chunks ---

    pub async fn insert_chunk(
        &self,
        file_id: i64,
        chunk_index: i64,
        chunk_size: i64,
        locator: &str,
        message_id: i64,
    ) -> Result<(), MetaError> {
        self.meta
            .prepare(
                "INSERT INTO file_chunks (file_id, chunk_index, chunk_size, locator, message_id) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(file_id)
            .bind(chunk_index)
            .bind(chunk_size)
            .bind(locator)
            .bind(message_id)
            .run()
            .await?;
        Ok(())
    }

    pub async fn chunks_for_file(&self, file_id: i64) -> Result<Vec<ChunkDescriptor>, MetaError> {
        let rows = self
            .meta
            .prepare(format!(
                "SELECT {CHUNK_COLS} FROM file_chunks WHERE file_id = ? \
                 ORDER BY chunk_index ASC"
            ))
            .bind(file_id)
            .all()
            .await?;
        Ok(rows.iter().filter_map(chunk_from_row).collect())
    }

    pub async fn delete_chunks(&self, file_id: i64) -> Result<u64, MetaError> {
        let run = self
            .meta
            .prepare("DELETE FROM file_chunks WHERE file_id = ?")
            .bind(file_id)
            .run()
            .await?;
        Ok(run.rows_affected)
    }

    // --- user settings ---

    /// Read an owner's settings, creating the idle row on first contact.
    pub async fn setting_for(
        &self,
        chat_id: &str,
        default_storage: StorageKind,
    ) -> Result<UserSetting, MetaError> {
        self.meta
            .prepare(format!(
                "INSERT OR IGNORE INTO user_settings ({SETTING_COLS}) VALUES (?, ?, ?, ?, ?)"
            ))
            .bind(chat_id)
            .bind(default_storage.as_str())
            .bind(SqlValue::Null)
            .bind(SqlValue::Null)
            .bind(SqlValue::Null)
            .run()
            .await?;

        let row = self
            .meta
            .prepare(format!(
                "SELECT {SETTING_COLS} FROM user_settings WHERE chat_id = ?"
            ))
            .bind(chat_id)
            .first()
            .await?;
        Ok(row
            .as_ref()
            .and_then(setting_from_row)
            .unwrap_or_else(|| UserSetting::idle(chat_id, default_storage)))
    }

    pub async fn update_setting(&self, setting: &UserSetting) -> Result<(), MetaError> {
        self.meta
            .prepare(
                "UPDATE user_settings SET storage_type = ?, category_id = ?, waiting_for = ?, \
                 editing_file_id = ? WHERE chat_id = ?",
            )
            .bind(setting.storage.as_str())
            .bind(setting.category_id)
            .bind(setting.waiting_for.clone())
            .bind(setting.editing_file_id)
            .bind(setting.chat_id.clone())
            .run()
            .await?;
        Ok(())
    }
}

fn category_from_row(row: &Row) -> Option<Category> {
    Some(Category {
        id: row.integer("id")?,
        name: row.owned_text("name")?,
        created_at: row.integer("created_at").unwrap_or(0),
    })
}

fn file_from_row(row: &Row) -> Option<FileRecord> {
    let storage = match row.text("storage_type")?.parse::<StorageKind>() {
        Ok(kind) => kind,
        Err(err) => {
            debug!("skipping file row with {err}");
            return None;
        }
    };
    Some(FileRecord {
        id: row.integer("id")?,
        url: row.owned_text("url")?,
        file_id: row.owned_text("file_id")?,
        message_id: row.integer("message_id").unwrap_or(-1),
        created_at: row.integer("created_at").unwrap_or(0),
        file_name: row.owned_text("file_name"),
        file_size: row.integer("file_size").unwrap_or(0),
        mime_type: row.owned_text("mime_type"),
        storage,
        category_id: row.integer("category_id"),
        chat_id: row.owned_text("chat_id"),
        custom_suffix: row.owned_text("custom_suffix"),
    })
}

fn chunk_from_row(row: &Row) -> Option<ChunkDescriptor> {
    Some(ChunkDescriptor {
        id: row.integer("id")?,
        file_id: row.integer("file_id")?,
        chunk_index: row.integer("chunk_index")?,
        chunk_size: row.integer("chunk_size")?,
        locator: row.owned_text("locator")?,
        message_id: row.integer("message_id").unwrap_or(-1),
    })
}

fn setting_from_row(row: &Row) -> Option<UserSetting> {
    let storage = row
        .text("storage_type")
        .and_then(|s| s.parse::<StorageKind>().ok())
        .unwrap_or(StorageKind::Telegram);
    Some(UserSetting {
        chat_id: row.owned_text("chat_id")?,
        storage,
        category_id: row.integer("category_id"),
        waiting_for: row.owned_text("waiting_for"),
        editing_file_id: row.integer("editing_file_id"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::memory::MemoryDriver;

    fn store() -> MetaStore {
        MetaStore::new(Arc::new(MemoryDriver::new()))
    }

    fn new_file(suffix: &str, owner: &str) -> NewFile {
        NewFile {
            url: format!("http://host/f/{suffix}"),
            file_id: format!("loc-{suffix}"),
            message_id: -1,
            file_name: Some(format!("{suffix}.bin")),
            file_size: 42,
            mime_type: Some("application/octet-stream".into()),
            storage: StorageKind::Bucket,
            category_id: None,
            chat_id: Some(owner.into()),
            custom_suffix: None,
        }
    }

    #[tokio::test]
    async fn file_roundtrips_through_rows() {
        let store = store();
        let inserted = store.insert_file(new_file("abc", "owner")).await.unwrap();
        assert!(inserted.id > 0);

        let fetched = store
            .file_by_url("http://host/f/abc")
            .await
            .unwrap()
            .expect("lookup by url");
        assert_eq!(fetched.storage, StorageKind::Bucket);
        assert_eq!(fetched.file_id, "loc-abc");

        let by_locator = store.file_by_locator("loc-abc", "owner").await.unwrap();
        assert!(by_locator.is_some());

        let by_suffix = store
            .file_by_suffix_or_name("abc", "owner")
            .await
            .unwrap()
            .expect("suffix lookup");
        assert_eq!(by_suffix.id, inserted.id);
    }

    #[tokio::test]
    async fn duplicate_url_is_rejected() {
        let store = store();
        store.insert_file(new_file("dup", "owner")).await.unwrap();
        let mut second = new_file("dup", "other");
        second.file_id = "loc-other".into();
        let err = store.insert_file(second).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn chunk_manifest_is_ordered_and_detachable() {
        let store = store();
        let file = store.insert_file(new_file("big", "owner")).await.unwrap();
        // Insert out of order; the read side must come back dense and sorted.
        for index in [2i64, 0, 1] {
            store
                .insert_chunk(file.id, index, 5, &format!("big.part{index:04}"), -1)
                .await
                .unwrap();
        }
        let chunks = store.chunks_for_file(file.id).await.unwrap();
        assert_eq!(
            chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(store.delete_chunks(file.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn settings_created_lazily_and_updated() {
        let store = store();
        let mut setting = store
            .setting_for("owner", StorageKind::Telegram)
            .await
            .unwrap();
        assert!(setting.waiting_for.is_none());

        setting.storage = StorageKind::BucketChunked;
        setting.waiting_for = Some("new_suffix".into());
        setting.editing_file_id = Some(9);
        store.update_setting(&setting).await.unwrap();

        let reread = store
            .setting_for("owner", StorageKind::Telegram)
            .await
            .unwrap();
        assert_eq!(reread.storage, StorageKind::BucketChunked);
        assert_eq!(reread.editing_file_id, Some(9));
    }
}
