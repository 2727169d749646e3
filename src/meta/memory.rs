//! In-memory relational emulator.
//!
//! Stands in for the real driver when no database is bound, and in tests.
//! State is four ordered row collections with per-table id counters behind a
//! mutex; queries are dispatched through [`crate::meta::intent`]'s finite
//! command set. Single-process and non-durable — that is the point.

use crate::meta::driver::{MetaDriver, MetaError, Row, RunResult, SqlValue};
use crate::meta::intent::{self, QueryIntent};
use crate::meta::schema;
use crate::models::category::DEFAULT_CATEGORY_NAME;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;

#[derive(Default)]
struct MemState {
    categories: Vec<Row>,
    files: Vec<Row>,
    file_chunks: Vec<Row>,
    user_settings: Vec<Row>,
    next_category_id: i64,
    next_file_id: i64,
    next_chunk_id: i64,
    seeded: bool,
}

impl MemState {
    /// Lazily guarantee the default category, mirroring what the
    /// bootstrapper does against a real store.
    fn seed(&mut self) {
        if self.seeded {
            return;
        }
        self.seeded = true;
        self.next_category_id += 1;
        let row = Row::new()
            .with("id", self.next_category_id)
            .with("name", DEFAULT_CATEGORY_NAME)
            .with("created_at", Utc::now().timestamp());
        self.categories.push(row);
    }
}

pub struct MemoryDriver {
    state: Mutex<MemState>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemState::default()),
        }
    }

    fn apply(&self, sql: &str, params: &[SqlValue]) -> Result<(RunResult, Vec<Row>), MetaError> {
        let mut state = self.state.lock().expect("emulator state poisoned");
        state.seed();

        let empty = (RunResult::default(), Vec::new());
        let intent = intent::parse(sql);
        match intent {
            QueryIntent::Liveness => {
                let row = Row::new().with("1", 1i64);
                Ok((RunResult::default(), vec![row]))
            }
            // The emulator's tables always exist with every column, so the
            // bootstrapper's structural statements succeed as no-ops.
            QueryIntent::CreateTable | QueryIntent::AlterAddColumn => Ok(empty),
            QueryIntent::TableInfo { table } => {
                let rows = schema::table(&table)
                    .map(|spec| {
                        spec.columns
                            .iter()
                            .enumerate()
                            .map(|(i, c)| {
                                Row::new()
                                    .with("cid", i as i64)
                                    .with("name", c.name)
                                    .with("type", c.ty)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok((RunResult::default(), rows))
            }

            QueryIntent::InsertCategory { or_ignore } => {
                let name = text_param(params, 0);
                if state.categories.iter().any(|c| c.text("name") == Some(name.as_str())) {
                    if or_ignore {
                        return Ok(empty);
                    }
                    return Err(MetaError::UniqueViolation(format!(
                        "categories.name `{name}`"
                    )));
                }
                state.next_category_id += 1;
                let id = state.next_category_id;
                let row = Row::new()
                    .with("id", id)
                    .with("name", name)
                    .with("created_at", integer_param(params, 1));
                state.categories.push(row);
                Ok((
                    RunResult {
                        last_insert_id: id,
                        rows_affected: 1,
                    },
                    Vec::new(),
                ))
            }
            QueryIntent::CategoryByName => {
                let name = text_param(params, 0);
                let rows = state
                    .categories
                    .iter()
                    .filter(|c| c.text("name") == Some(name.as_str()))
                    .cloned()
                    .collect();
                Ok((RunResult::default(), rows))
            }
            QueryIntent::CategoryById => {
                let id = integer_param(params, 0);
                let rows = state
                    .categories
                    .iter()
                    .filter(|c| c.integer("id") == id.as_integer())
                    .cloned()
                    .collect();
                Ok((RunResult::default(), rows))
            }
            QueryIntent::ListCategories => {
                let mut rows: Vec<Row> = state.categories.clone();
                rows.sort_by_key(|r| r.integer("id").unwrap_or(0));
                Ok((RunResult::default(), rows))
            }
            QueryIntent::DeleteCategory => {
                let id = integer_param(params, 0);
                let before = state.categories.len();
                state
                    .categories
                    .retain(|c| c.integer("id") != id.as_integer());
                Ok((affected(before - state.categories.len()), Vec::new()))
            }

            QueryIntent::InsertFile => {
                let url = text_param(params, 0);
                let file_id = text_param(params, 1);
                let chat_id = params.get(9).cloned().unwrap_or(SqlValue::Null);
                if state.files.iter().any(|f| f.text("url") == Some(url.as_str())) {
                    return Err(MetaError::UniqueViolation(format!("files.url `{url}`")));
                }
                if !chat_id.is_null()
                    && state.files.iter().any(|f| {
                        f.text("file_id") == Some(file_id.as_str())
                            && f.value("chat_id") == Some(&chat_id)
                    })
                {
                    return Err(MetaError::UniqueViolation(format!(
                        "files locator `{file_id}` for owner"
                    )));
                }
                state.next_file_id += 1;
                let id = state.next_file_id;
                let row = Row::new()
                    .with("id", id)
                    .with("url", url)
                    .with("file_id", file_id)
                    .with("message_id", integer_param(params, 2))
                    .with("created_at", integer_param(params, 3))
                    .with("file_name", params.get(4).cloned().unwrap_or(SqlValue::Null))
                    .with("file_size", params.get(5).cloned().unwrap_or(SqlValue::Null))
                    .with("mime_type", params.get(6).cloned().unwrap_or(SqlValue::Null))
                    .with(
                        "storage_type",
                        params.get(7).cloned().unwrap_or(SqlValue::Null),
                    )
                    .with(
                        "category_id",
                        params.get(8).cloned().unwrap_or(SqlValue::Null),
                    )
                    .with("chat_id", chat_id)
                    .with(
                        "custom_suffix",
                        params.get(10).cloned().unwrap_or(SqlValue::Null),
                    );
                state.files.push(row);
                Ok((
                    RunResult {
                        last_insert_id: id,
                        rows_affected: 1,
                    },
                    Vec::new(),
                ))
            }
            QueryIntent::FileById => {
                let id = integer_param(params, 0);
                let rows = state
                    .files
                    .iter()
                    .filter(|f| f.integer("id") == id.as_integer())
                    .cloned()
                    .collect();
                Ok((RunResult::default(), rows))
            }
            QueryIntent::FileByUrl => {
                let url = text_param(params, 0);
                let rows = state
                    .files
                    .iter()
                    .filter(|f| f.text("url") == Some(url.as_str()))
                    .cloned()
                    .collect();
                Ok((RunResult::default(), rows))
            }
            QueryIntent::FileByLocator => {
                let file_id = text_param(params, 0);
                let chat_id = params.get(1).cloned().unwrap_or(SqlValue::Null);
                let rows = state
                    .files
                    .iter()
                    .filter(|f| {
                        f.text("file_id") == Some(file_id.as_str())
                            && f.value("chat_id") == Some(&chat_id)
                    })
                    .cloned()
                    .collect();
                Ok((RunResult::default(), rows))
            }
            QueryIntent::FileByName => {
                let name = text_param(params, 0);
                let rows = state
                    .files
                    .iter()
                    .filter(|f| f.text("file_name") == Some(name.as_str()))
                    .cloned()
                    .collect();
                Ok((RunResult::default(), rows))
            }
            QueryIntent::FileBySuffixOrName => {
                let name = text_param(params, 0);
                let url_pattern = text_param(params, 1);
                let chat_id = params.get(2).cloned().unwrap_or(SqlValue::Null);
                let rows = state
                    .files
                    .iter()
                    .filter(|f| f.value("chat_id") == Some(&chat_id))
                    .filter(|f| {
                        f.text("file_name") == Some(name.as_str())
                            || f.text("url").is_some_and(|u| like_match(&url_pattern, u))
                    })
                    .cloned()
                    .collect();
                Ok((RunResult::default(), rows))
            }
            QueryIntent::FilesByOwner => {
                let chat_id = params.first().cloned().unwrap_or(SqlValue::Null);
                let mut rows: Vec<Row> = state
                    .files
                    .iter()
                    .filter(|f| f.value("chat_id") == Some(&chat_id))
                    .cloned()
                    .collect();
                sort_recent_first(&mut rows);
                Ok((RunResult::default(), rows))
            }
            QueryIntent::SearchFiles => {
                let pattern = text_param(params, 0);
                let mut rows: Vec<Row> = state
                    .files
                    .iter()
                    .filter(|f| {
                        f.text("file_name")
                            .is_some_and(|n| like_match(&pattern, n))
                    })
                    .cloned()
                    .collect();
                sort_recent_first(&mut rows);
                Ok((RunResult::default(), rows))
            }
            QueryIntent::OwnerStats => {
                let chat_id = params.first().cloned().unwrap_or(SqlValue::Null);
                let mut count = 0i64;
                let mut total = 0i64;
                for f in state
                    .files
                    .iter()
                    .filter(|f| f.value("chat_id") == Some(&chat_id))
                {
                    count += 1;
                    total += f.integer("file_size").unwrap_or(0);
                }
                let row = Row::new()
                    .with("file_count", count)
                    .with("total_bytes", total);
                Ok((RunResult::default(), vec![row]))
            }
            QueryIntent::UpdateFileUrl => {
                let n = update_files(&mut state.files, params, 2, |row, p| {
                    row.set("url", p[0].clone());
                    row.set("custom_suffix", p[1].clone());
                });
                Ok((affected(n), Vec::new()))
            }
            QueryIntent::UpdateFileCategory => {
                let n = update_files(&mut state.files, params, 1, |row, p| {
                    row.set("category_id", p[0].clone());
                });
                Ok((affected(n), Vec::new()))
            }
            QueryIntent::UpdateFileLocator => {
                let n = update_files(&mut state.files, params, 2, |row, p| {
                    row.set("file_id", p[0].clone());
                    row.set("message_id", p[1].clone());
                });
                Ok((affected(n), Vec::new()))
            }
            QueryIntent::UpdateFileRelocation => {
                let n = update_files(&mut state.files, params, 4, |row, p| {
                    row.set("url", p[0].clone());
                    row.set("custom_suffix", p[1].clone());
                    row.set("file_id", p[2].clone());
                    row.set("message_id", p[3].clone());
                });
                Ok((affected(n), Vec::new()))
            }
            QueryIntent::DeleteFile => {
                let id = integer_param(params, 0);
                let before = state.files.len();
                state.files.retain(|f| f.integer("id") != id.as_integer());
                Ok((affected(before - state.files.len()), Vec::new()))
            }
            QueryIntent::ReassignFilesCategory { from_null } => {
                let n = reassign_category(&mut state.files, params, from_null);
                Ok((affected(n), Vec::new()))
            }

            QueryIntent::InsertChunk => {
                state.next_chunk_id += 1;
                let id = state.next_chunk_id;
                let row = Row::new()
                    .with("id", id)
                    .with("file_id", integer_param(params, 0))
                    .with("chunk_index", integer_param(params, 1))
                    .with("chunk_size", integer_param(params, 2))
                    .with("locator", text_param(params, 3))
                    .with("message_id", integer_param(params, 4));
                state.file_chunks.push(row);
                Ok((
                    RunResult {
                        last_insert_id: id,
                        rows_affected: 1,
                    },
                    Vec::new(),
                ))
            }
            QueryIntent::ChunksByFile => {
                let file_id = integer_param(params, 0);
                let mut rows: Vec<Row> = state
                    .file_chunks
                    .iter()
                    .filter(|c| c.integer("file_id") == file_id.as_integer())
                    .cloned()
                    .collect();
                rows.sort_by_key(|r| r.integer("chunk_index").unwrap_or(0));
                Ok((RunResult::default(), rows))
            }
            QueryIntent::DeleteChunks => {
                let file_id = integer_param(params, 0);
                let before = state.file_chunks.len();
                state
                    .file_chunks
                    .retain(|c| c.integer("file_id") != file_id.as_integer());
                Ok((affected(before - state.file_chunks.len()), Vec::new()))
            }

            QueryIntent::InsertSetting => {
                let chat_id = text_param(params, 0);
                if state
                    .user_settings
                    .iter()
                    .any(|s| s.text("chat_id") == Some(chat_id.as_str()))
                {
                    // Settings inserts are upsert-shaped (INSERT OR IGNORE).
                    return Ok(empty);
                }
                let row = Row::new()
                    .with("chat_id", chat_id)
                    .with(
                        "storage_type",
                        params.get(1).cloned().unwrap_or(SqlValue::Null),
                    )
                    .with(
                        "category_id",
                        params.get(2).cloned().unwrap_or(SqlValue::Null),
                    )
                    .with(
                        "waiting_for",
                        params.get(3).cloned().unwrap_or(SqlValue::Null),
                    )
                    .with(
                        "editing_file_id",
                        params.get(4).cloned().unwrap_or(SqlValue::Null),
                    );
                state.user_settings.push(row);
                Ok((affected(1), Vec::new()))
            }
            QueryIntent::SettingByOwner => {
                let chat_id = text_param(params, 0);
                let rows = state
                    .user_settings
                    .iter()
                    .filter(|s| s.text("chat_id") == Some(chat_id.as_str()))
                    .cloned()
                    .collect();
                Ok((RunResult::default(), rows))
            }
            QueryIntent::UpdateSetting => {
                let chat_id = text_param(params, 4);
                let mut n = 0;
                for row in state
                    .user_settings
                    .iter_mut()
                    .filter(|s| s.text("chat_id") == Some(chat_id.as_str()))
                {
                    row.set("storage_type", params[0].clone());
                    row.set("category_id", params[1].clone());
                    row.set("waiting_for", params[2].clone());
                    row.set("editing_file_id", params[3].clone());
                    n += 1;
                }
                Ok((affected(n), Vec::new()))
            }
            QueryIntent::ReassignSettingsCategory { from_null } => {
                let n = reassign_category(&mut state.user_settings, params, from_null);
                Ok((affected(n), Vec::new()))
            }

            // Outside the enumerated set: succeed with nothing, per contract.
            QueryIntent::Unrecognized => Ok(empty),
        }
    }
}

#[async_trait]
impl MetaDriver for MemoryDriver {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<RunResult, MetaError> {
        self.apply(sql, params).map(|(run, _)| run)
    }

    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, MetaError> {
        self.apply(sql, params).map(|(_, rows)| rows)
    }

    async fn fetch_first(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, MetaError> {
        self.apply(sql, params)
            .map(|(_, rows)| rows.into_iter().next())
    }
}

fn affected(n: usize) -> RunResult {
    RunResult {
        last_insert_id: 0,
        rows_affected: n as u64,
    }
}

fn text_param(params: &[SqlValue], index: usize) -> String {
    params
        .get(index)
        .and_then(SqlValue::as_text)
        .unwrap_or_default()
        .to_string()
}

fn integer_param(params: &[SqlValue], index: usize) -> SqlValue {
    params.get(index).cloned().unwrap_or(SqlValue::Null)
}

fn sort_recent_first(rows: &mut [Row]) {
    rows.sort_by(|a, b| {
        let key = |r: &Row| (r.integer("created_at").unwrap_or(0), r.integer("id").unwrap_or(0));
        key(b).cmp(&key(a))
    });
}

fn update_files<F>(files: &mut [Row], params: &[SqlValue], id_index: usize, apply: F) -> usize
where
    F: Fn(&mut Row, &[SqlValue]),
{
    let id = params.get(id_index).cloned().unwrap_or(SqlValue::Null);
    let mut n = 0;
    for row in files
        .iter_mut()
        .filter(|f| f.integer("id") == id.as_integer())
    {
        apply(row, params);
        n += 1;
    }
    n
}

fn reassign_category(rows: &mut [Row], params: &[SqlValue], from_null: bool) -> usize {
    let new_id = params.first().cloned().unwrap_or(SqlValue::Null);
    let old_id = params.get(1).cloned().unwrap_or(SqlValue::Null);
    let mut n = 0;
    for row in rows.iter_mut() {
        let current = row.value("category_id").cloned().unwrap_or(SqlValue::Null);
        let matches = if from_null {
            current.is_null()
        } else {
            current == old_id
        };
        if matches {
            row.set("category_id", new_id.clone());
            n += 1;
        }
    }
    n
}

/// SQL LIKE for the patterns the enumerated statements actually use:
/// `%x`, `x%`, `%x%`, and exact. ASCII case-insensitive, like SQLite.
fn like_match(pattern: &str, value: &str) -> bool {
    let p = pattern.to_ascii_lowercase();
    let v = value.to_ascii_lowercase();
    match (p.starts_with('%'), p.ends_with('%') && p.len() > 1) {
        (true, true) => v.contains(p.trim_matches('%')),
        (true, false) => v.ends_with(p.trim_start_matches('%')),
        (false, true) => v.starts_with(p.trim_end_matches('%')),
        (false, false) => v == p,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::driver::Meta;
    use std::sync::Arc;

    fn meta() -> Meta {
        Meta::new(Arc::new(MemoryDriver::new()))
    }

    #[tokio::test]
    async fn seeds_default_category_on_first_use() {
        let meta = meta();
        // Re-inserting the default is a no-op, not an error.
        meta.prepare("INSERT OR IGNORE INTO categories (name, created_at) VALUES (?, ?)")
            .bind(DEFAULT_CATEGORY_NAME)
            .bind(0i64)
            .run()
            .await
            .unwrap();
        let row = meta
            .prepare("SELECT id, name, created_at FROM categories WHERE name = ?")
            .bind(DEFAULT_CATEGORY_NAME)
            .first()
            .await
            .unwrap()
            .expect("default category must exist");
        assert!(row.integer("id").unwrap() > 0);
    }

    #[tokio::test]
    async fn plain_duplicate_category_is_a_unique_violation() {
        let meta = meta();
        let err = meta
            .prepare("INSERT INTO categories (name, created_at) VALUES (?, ?)")
            .bind(DEFAULT_CATEGORY_NAME)
            .bind(0i64)
            .run()
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn files_roundtrip_and_owner_ordering() {
        let meta = meta();
        for (i, suffix) in ["a", "b", "c"].iter().enumerate() {
            meta.prepare(
                "INSERT INTO files (url, file_id, message_id, created_at, file_name, file_size, \
                 mime_type, storage_type, category_id, chat_id, custom_suffix) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(format!("http://host/f/{suffix}"))
            .bind(format!("loc-{suffix}"))
            .bind(-1i64)
            .bind(100 + i as i64)
            .bind(format!("{suffix}.bin"))
            .bind(10i64)
            .bind("application/octet-stream")
            .bind("bucket")
            .bind(SqlValue::Null)
            .bind("owner")
            .bind(SqlValue::Null)
            .run()
            .await
            .unwrap();
        }

        let rows = meta
            .prepare("SELECT * FROM files WHERE chat_id = ? ORDER BY created_at DESC")
            .bind("owner")
            .all()
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].text("file_name"), Some("c.bin"));

        let by_url = meta
            .prepare("SELECT * FROM files WHERE url = ?")
            .bind("http://host/f/b")
            .first()
            .await
            .unwrap();
        assert!(by_url.is_some());

        let by_suffix = meta
            .prepare(
                "SELECT * FROM files WHERE (file_name = ? OR url LIKE ?) AND chat_id = ?",
            )
            .bind("nope")
            .bind("%/a")
            .bind("owner")
            .first()
            .await
            .unwrap()
            .expect("suffix lookup should match");
        assert_eq!(by_suffix.text("file_id"), Some("loc-a"));

        let stats = meta
            .prepare(
                "SELECT COUNT(*) AS file_count, COALESCE(SUM(file_size), 0) AS total_bytes \
                 FROM files WHERE chat_id = ?",
            )
            .bind("owner")
            .first()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.integer("file_count"), Some(3));
        assert_eq!(stats.integer("total_bytes"), Some(30));
    }

    #[tokio::test]
    async fn reassigns_categories_on_delete() {
        let meta = meta();
        let cat = meta
            .prepare("INSERT INTO categories (name, created_at) VALUES (?, ?)")
            .bind("videos")
            .bind(0i64)
            .run()
            .await
            .unwrap();
        meta.prepare(
            "INSERT INTO files (url, file_id, message_id, created_at, file_name, file_size, \
             mime_type, storage_type, category_id, chat_id, custom_suffix) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind("http://host/f/v")
        .bind("loc-v")
        .bind(-1i64)
        .bind(1i64)
        .bind("v.mp4")
        .bind(1i64)
        .bind("video/mp4")
        .bind("bucket")
        .bind(cat.last_insert_id)
        .bind("owner")
        .bind(SqlValue::Null)
        .run()
        .await
        .unwrap();

        let moved = meta
            .prepare("UPDATE files SET category_id = ? WHERE category_id = ?")
            .bind(1i64)
            .bind(cat.last_insert_id)
            .run()
            .await
            .unwrap();
        assert_eq!(moved.rows_affected, 1);

        meta.prepare("DELETE FROM categories WHERE id = ?")
            .bind(cat.last_insert_id)
            .run()
            .await
            .unwrap();

        let file = meta
            .prepare("SELECT * FROM files WHERE url = ?")
            .bind("http://host/f/v")
            .first()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.integer("category_id"), Some(1));
    }

    #[tokio::test]
    async fn settings_upsert_then_update() {
        let meta = meta();
        for _ in 0..2 {
            meta.prepare(
                "INSERT OR IGNORE INTO user_settings \
                 (chat_id, storage_type, category_id, waiting_for, editing_file_id) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind("owner")
            .bind("telegram")
            .bind(SqlValue::Null)
            .bind(SqlValue::Null)
            .bind(SqlValue::Null)
            .run()
            .await
            .unwrap();
        }

        meta.prepare(
            "UPDATE user_settings SET storage_type = ?, category_id = ?, waiting_for = ?, \
             editing_file_id = ? WHERE chat_id = ?",
        )
        .bind("bucket")
        .bind(2i64)
        .bind("new_suffix")
        .bind(7i64)
        .bind("owner")
        .run()
        .await
        .unwrap();

        let rows = meta
            .prepare("SELECT * FROM user_settings WHERE chat_id = ?")
            .bind("owner")
            .all()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("storage_type"), Some("bucket"));
        assert_eq!(rows[0].text("waiting_for"), Some("new_suffix"));
    }

    #[tokio::test]
    async fn unrecognized_statements_are_noops() {
        let meta = meta();
        let run = meta.prepare("VACUUM").run().await.unwrap();
        assert_eq!(run.rows_affected, 0);
        let rows = meta.prepare("SELECT * FROM sqlite_master").all().await.unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn like_match_covers_used_patterns() {
        assert!(like_match("%/abc", "http://host/f/abc"));
        assert!(!like_match("%/abc", "http://host/f/abcd"));
        assert!(like_match("%report%", "Quarterly-REPORT.pdf"));
        assert!(like_match("exact", "EXACT"));
    }
}
