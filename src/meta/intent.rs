//! Query-intent parser for the in-memory emulator.
//!
//! The service issues a fixed, enumerated set of statement shapes (the
//! constants in [`crate::meta::store`]). This module normalizes incoming
//! query text and classifies it into one [`QueryIntent`] variant; the
//! emulator dispatches on the variant and never inspects SQL text itself.
//! Anything outside the set maps to [`QueryIntent::Unrecognized`], which the
//! emulator executes as an empty no-op.

/// Collapse whitespace runs, trim, lowercase. Bound parameters (`?`) are
/// untouched, so normalized shapes are stable regardless of caller
/// formatting.
pub fn normalize(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The finite command set the emulator understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryIntent {
    /// `SELECT 1` — liveness probe.
    Liveness,
    /// `CREATE TABLE IF NOT EXISTS ...` — the emulator's tables always
    /// exist, so this succeeds without doing anything.
    CreateTable,
    /// `ALTER TABLE <t> ADD COLUMN ...` — same, a structural no-op.
    AlterAddColumn,
    /// `PRAGMA table_info(<t>)` — reports the fixed schema so the
    /// bootstrapper's verification passes cleanly.
    TableInfo { table: String },

    InsertCategory { or_ignore: bool },
    CategoryByName,
    CategoryById,
    ListCategories,
    DeleteCategory,

    InsertFile,
    FileById,
    FileByUrl,
    FileByLocator,
    FileByName,
    FileBySuffixOrName,
    FilesByOwner,
    SearchFiles,
    OwnerStats,
    UpdateFileUrl,
    UpdateFileCategory,
    UpdateFileLocator,
    UpdateFileRelocation,
    DeleteFile,
    ReassignFilesCategory { from_null: bool },

    InsertChunk,
    ChunksByFile,
    DeleteChunks,

    InsertSetting,
    SettingByOwner,
    UpdateSetting,
    ReassignSettingsCategory { from_null: bool },

    Unrecognized,
}

/// Classify one normalized statement.
pub fn parse(sql: &str) -> QueryIntent {
    let q = normalize(sql);

    if q == "select 1" {
        return QueryIntent::Liveness;
    }
    if q.starts_with("create table") {
        return QueryIntent::CreateTable;
    }
    if q.starts_with("alter table") && q.contains("add column") {
        return QueryIntent::AlterAddColumn;
    }
    if let Some(rest) = q.strip_prefix("pragma table_info(") {
        let table = rest.trim_end_matches(')').trim().to_string();
        return QueryIntent::TableInfo { table };
    }

    if q.starts_with("insert") {
        return parse_insert(&q);
    }
    if q.starts_with("select") {
        return parse_select(&q);
    }
    if q.starts_with("update") {
        return parse_update(&q);
    }
    if q.starts_with("delete") {
        return parse_delete(&q);
    }

    QueryIntent::Unrecognized
}

fn parse_insert(q: &str) -> QueryIntent {
    if q.contains("into categories") {
        return QueryIntent::InsertCategory {
            or_ignore: q.starts_with("insert or ignore"),
        };
    }
    if q.contains("into file_chunks") {
        return QueryIntent::InsertChunk;
    }
    if q.contains("into files") {
        return QueryIntent::InsertFile;
    }
    if q.contains("into user_settings") {
        return QueryIntent::InsertSetting;
    }
    QueryIntent::Unrecognized
}

fn parse_select(q: &str) -> QueryIntent {
    if q.contains("from categories") {
        if q.contains("where name = ?") {
            return QueryIntent::CategoryByName;
        }
        if q.contains("where id = ?") {
            return QueryIntent::CategoryById;
        }
        return QueryIntent::ListCategories;
    }
    if q.contains("from file_chunks") {
        if q.contains("where file_id = ?") {
            return QueryIntent::ChunksByFile;
        }
        return QueryIntent::Unrecognized;
    }
    if q.contains("from files") {
        if q.contains("count(*)") {
            return QueryIntent::OwnerStats;
        }
        if q.contains("where id = ?") {
            return QueryIntent::FileById;
        }
        if q.contains("where url = ?") {
            return QueryIntent::FileByUrl;
        }
        if q.contains("where file_id = ? and chat_id = ?") {
            return QueryIntent::FileByLocator;
        }
        if q.contains("(file_name = ? or url like ?) and chat_id = ?") {
            return QueryIntent::FileBySuffixOrName;
        }
        if q.contains("where file_name = ?") {
            return QueryIntent::FileByName;
        }
        if q.contains("lower(file_name) like") {
            return QueryIntent::SearchFiles;
        }
        if q.contains("where chat_id = ?") {
            return QueryIntent::FilesByOwner;
        }
        return QueryIntent::Unrecognized;
    }
    if q.contains("from user_settings") && q.contains("where chat_id = ?") {
        return QueryIntent::SettingByOwner;
    }
    QueryIntent::Unrecognized
}

fn parse_update(q: &str) -> QueryIntent {
    if q.starts_with("update files set category_id = ?") {
        if q.ends_with("where category_id is null") {
            return QueryIntent::ReassignFilesCategory { from_null: true };
        }
        if q.ends_with("where category_id = ?") {
            return QueryIntent::ReassignFilesCategory { from_null: false };
        }
        if q.ends_with("where id = ?") {
            return QueryIntent::UpdateFileCategory;
        }
        return QueryIntent::Unrecognized;
    }
    if q.starts_with("update files set") && q.ends_with("where id = ?") {
        let relocation = q.contains("url = ?") && q.contains("file_id = ?");
        if relocation {
            return QueryIntent::UpdateFileRelocation;
        }
        if q.contains("url = ?") {
            return QueryIntent::UpdateFileUrl;
        }
        if q.contains("file_id = ?") {
            return QueryIntent::UpdateFileLocator;
        }
        return QueryIntent::Unrecognized;
    }
    if q.starts_with("update user_settings set category_id = ?") {
        if q.ends_with("where category_id is null") {
            return QueryIntent::ReassignSettingsCategory { from_null: true };
        }
        if q.ends_with("where category_id = ?") {
            return QueryIntent::ReassignSettingsCategory { from_null: false };
        }
        return QueryIntent::Unrecognized;
    }
    if q.starts_with("update user_settings set") && q.ends_with("where chat_id = ?") {
        return QueryIntent::UpdateSetting;
    }
    QueryIntent::Unrecognized
}

fn parse_delete(q: &str) -> QueryIntent {
    if q.contains("from categories where id = ?") {
        return QueryIntent::DeleteCategory;
    }
    if q.contains("from file_chunks where file_id = ?") {
        return QueryIntent::DeleteChunks;
    }
    if q.contains("from files where id = ?") {
        return QueryIntent::DeleteFile;
    }
    QueryIntent::Unrecognized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_whitespace_and_case() {
        assert_eq!(
            normalize("  SELECT id\n   FROM   categories WHERE name = ?  "),
            "select id from categories where name = ?"
        );
    }

    #[test]
    fn classifies_bootstrap_shapes() {
        assert_eq!(parse("SELECT 1"), QueryIntent::Liveness);
        assert_eq!(
            parse("CREATE TABLE IF NOT EXISTS files (id INTEGER PRIMARY KEY)"),
            QueryIntent::CreateTable
        );
        assert_eq!(
            parse("ALTER TABLE files ADD COLUMN custom_suffix TEXT"),
            QueryIntent::AlterAddColumn
        );
        assert_eq!(
            parse("PRAGMA table_info(user_settings)"),
            QueryIntent::TableInfo {
                table: "user_settings".into()
            }
        );
    }

    #[test]
    fn distinguishes_file_lookups() {
        assert_eq!(
            parse("SELECT id FROM files WHERE url = ?"),
            QueryIntent::FileByUrl
        );
        assert_eq!(
            parse("SELECT id FROM files WHERE file_id = ? AND chat_id = ?"),
            QueryIntent::FileByLocator
        );
        assert_eq!(
            parse("SELECT id FROM files WHERE (file_name = ? OR url LIKE ?) AND chat_id = ?"),
            QueryIntent::FileBySuffixOrName
        );
        assert_eq!(
            parse("SELECT id FROM files WHERE chat_id = ? ORDER BY created_at DESC"),
            QueryIntent::FilesByOwner
        );
    }

    #[test]
    fn distinguishes_update_shapes() {
        assert_eq!(
            parse("UPDATE files SET url = ?, custom_suffix = ? WHERE id = ?"),
            QueryIntent::UpdateFileUrl
        );
        assert_eq!(
            parse("UPDATE files SET file_id = ?, message_id = ? WHERE id = ?"),
            QueryIntent::UpdateFileLocator
        );
        assert_eq!(
            parse("UPDATE files SET url = ?, custom_suffix = ?, file_id = ?, message_id = ? WHERE id = ?"),
            QueryIntent::UpdateFileRelocation
        );
        assert_eq!(
            parse("UPDATE files SET category_id = ? WHERE category_id IS NULL"),
            QueryIntent::ReassignFilesCategory { from_null: true }
        );
    }

    #[test]
    fn unknown_statements_fall_through() {
        assert_eq!(parse("VACUUM"), QueryIntent::Unrecognized);
        assert_eq!(
            parse("SELECT * FROM sqlite_master"),
            QueryIntent::Unrecognized
        );
    }
}
