//! The fixed relational schema.
//!
//! One place declares every table, its `CREATE TABLE` statement, and the
//! required columns with their declared types. The bootstrapper verifies and
//! repairs real databases against this; the in-memory emulator answers
//! `PRAGMA table_info` from it.

pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: &'static str,
}

pub struct TableSpec {
    pub name: &'static str,
    pub create_sql: &'static str,
    pub columns: &'static [ColumnSpec],
}

const fn col(name: &'static str, ty: &'static str) -> ColumnSpec {
    ColumnSpec { name, ty }
}

pub const TABLES: &[TableSpec] = &[
    TableSpec {
        name: "categories",
        create_sql: "CREATE TABLE IF NOT EXISTS categories (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            name       TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        )",
        columns: &[
            col("id", "INTEGER"),
            col("name", "TEXT"),
            col("created_at", "INTEGER"),
        ],
    },
    TableSpec {
        name: "files",
        create_sql: "CREATE TABLE IF NOT EXISTS files (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            url           TEXT NOT NULL UNIQUE,
            file_id       TEXT NOT NULL,
            message_id    INTEGER NOT NULL DEFAULT -1,
            created_at    INTEGER NOT NULL,
            file_name     TEXT,
            file_size     INTEGER,
            mime_type     TEXT,
            storage_type  TEXT NOT NULL DEFAULT 'telegram',
            category_id   INTEGER,
            chat_id       TEXT,
            custom_suffix TEXT
        )",
        columns: &[
            col("id", "INTEGER"),
            col("url", "TEXT"),
            col("file_id", "TEXT"),
            col("message_id", "INTEGER"),
            col("created_at", "INTEGER"),
            col("file_name", "TEXT"),
            col("file_size", "INTEGER"),
            col("mime_type", "TEXT"),
            col("storage_type", "TEXT"),
            col("category_id", "INTEGER"),
            col("chat_id", "TEXT"),
            col("custom_suffix", "TEXT"),
        ],
    },
    TableSpec {
        name: "file_chunks",
        create_sql: "CREATE TABLE IF NOT EXISTS file_chunks (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id     INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_size  INTEGER NOT NULL,
            locator     TEXT NOT NULL,
            message_id  INTEGER NOT NULL DEFAULT -1
        )",
        columns: &[
            col("id", "INTEGER"),
            col("file_id", "INTEGER"),
            col("chunk_index", "INTEGER"),
            col("chunk_size", "INTEGER"),
            col("locator", "TEXT"),
            col("message_id", "INTEGER"),
        ],
    },
    TableSpec {
        name: "user_settings",
        create_sql: "CREATE TABLE IF NOT EXISTS user_settings (
            chat_id         TEXT NOT NULL UNIQUE,
            storage_type    TEXT NOT NULL DEFAULT 'telegram',
            category_id     INTEGER,
            waiting_for     TEXT,
            editing_file_id INTEGER
        )",
        columns: &[
            col("chat_id", "TEXT"),
            col("storage_type", "TEXT"),
            col("category_id", "INTEGER"),
            col("waiting_for", "TEXT"),
            col("editing_file_id", "INTEGER"),
        ],
    },
];

pub fn table(name: &str) -> Option<&'static TableSpec> {
    TABLES.iter().find(|t| t.name.eq_ignore_ascii_case(name))
}
