//! Real metadata driver backed by a pooled SQLite connection.

use crate::meta::driver::{MetaDriver, MetaError, Row, RunResult, SqlValue};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row as _, SqlitePool, TypeInfo, ValueRef};
use std::sync::Arc;

pub struct SqliteDriver {
    pool: Arc<SqlitePool>,
}

impl SqliteDriver {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl MetaDriver for SqliteDriver {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<RunResult, MetaError> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&*self.pool)
            .await?;
        Ok(RunResult {
            last_insert_id: result.last_insert_rowid(),
            rows_affected: result.rows_affected(),
        })
    }

    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, MetaError> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&*self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn fetch_first(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>, MetaError> {
        let row = bind_params(sqlx::query(sql), params)
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
    params: &[SqlValue],
) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

/// Decode one dynamically typed SQLite row by storage class. The metadata
/// schema never stores blobs, so those decode as NULL rather than erroring.
fn decode_row(row: &SqliteRow) -> Result<Row, MetaError> {
    let mut out = Row::new();
    for column in row.columns() {
        let i = column.ordinal();
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => SqlValue::Integer(row.try_get::<i64, _>(i)?),
                "REAL" => SqlValue::Real(row.try_get::<f64, _>(i)?),
                "BLOB" => SqlValue::Null,
                _ => SqlValue::Text(row.try_get::<String, _>(i)?),
            }
        };
        out.set(column.name(), value);
    }
    Ok(out)
}
