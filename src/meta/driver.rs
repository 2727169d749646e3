//! The metadata driver contract.
//!
//! Everything above this layer speaks `prepare(sql) -> Statement` followed by
//! `bind`/`run`/`all`/`first`, regardless of whether a real SQLite pool or the
//! in-memory emulator sits underneath. The implementation is chosen once at
//! construction time and injected — callers never inspect which one they got.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// A dynamically typed SQL parameter or column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlValue::Null,
        }
    }
}

/// One result row, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: BTreeMap<String, SqlValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: &str, value: impl Into<SqlValue>) {
        self.columns.insert(column.to_string(), value.into());
    }

    pub fn with(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.set(column, value);
        self
    }

    pub fn value(&self, column: &str) -> Option<&SqlValue> {
        self.columns.get(column)
    }

    pub fn integer(&self, column: &str) -> Option<i64> {
        self.columns.get(column).and_then(SqlValue::as_integer)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.columns.get(column).and_then(SqlValue::as_text)
    }

    pub fn owned_text(&self, column: &str) -> Option<String> {
        self.text(column).map(str::to_string)
    }
}

/// Outcome of a mutating statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunResult {
    pub last_insert_id: i64,
    pub rows_affected: u64,
}

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("metadata query failed: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
}

impl MetaError {
    /// SQLite reports a duplicate-column `ALTER TABLE` as an error; the
    /// bootstrapper treats that race as success.
    pub fn is_duplicate_column(&self) -> bool {
        match self {
            MetaError::Sqlx(err) => err
                .to_string()
                .to_ascii_lowercase()
                .contains("duplicate column"),
            MetaError::UniqueViolation(_) => false,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        match self {
            MetaError::Sqlx(sqlx::Error::Database(db_err)) => {
                db_err.message().to_ascii_lowercase().contains("unique")
            }
            MetaError::UniqueViolation(_) => true,
            _ => false,
        }
    }
}

/// Backend half of the driver contract; object-safe so the store can hold
/// `Arc<dyn MetaDriver>`.
#[async_trait]
pub trait MetaDriver: Send + Sync {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<RunResult, MetaError>;

    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, MetaError>;

    async fn fetch_first(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, MetaError>;
}

/// Handle the rest of the service talks through.
#[derive(Clone)]
pub struct Meta {
    driver: Arc<dyn MetaDriver>,
}

impl Meta {
    pub fn new(driver: Arc<dyn MetaDriver>) -> Self {
        Self { driver }
    }

    pub fn prepare(&self, sql: impl Into<String>) -> Statement {
        Statement {
            driver: Arc::clone(&self.driver),
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// A prepared statement with its bound parameters.
pub struct Statement {
    driver: Arc<dyn MetaDriver>,
    sql: String,
    params: Vec<SqlValue>,
}

impl Statement {
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }

    pub async fn run(self) -> Result<RunResult, MetaError> {
        self.driver.execute(&self.sql, &self.params).await
    }

    pub async fn all(self) -> Result<Vec<Row>, MetaError> {
        self.driver.fetch_all(&self.sql, &self.params).await
    }

    pub async fn first(self) -> Result<Option<Row>, MetaError> {
        self.driver.fetch_first(&self.sql, &self.params).await
    }
}
