//! Idempotent create/verify/repair of the metadata schema.
//!
//! Runs before the store serves its first query. Each attempt probes
//! liveness, checks every required table and column, repairs what is missing
//! with non-destructive statements, and guarantees the default category.
//! Retried with exponential backoff up to a fixed ceiling; a missing default
//! category after repair is fatal immediately.

use crate::meta::driver::{Meta, MetaError, Row};
use crate::meta::schema::{self, ColumnSpec};
use crate::models::category::DEFAULT_CATEGORY_NAME;
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 5;

#[derive(Debug, Error)]
#[error("metadata schema bootstrap failed after {attempts} attempt(s): {reason}")]
pub struct InitError {
    pub attempts: u32,
    pub reason: String,
}

enum Failure {
    Retryable(String),
    Fatal(String),
}

impl From<MetaError> for Failure {
    fn from(err: MetaError) -> Self {
        Failure::Retryable(err.to_string())
    }
}

/// Bring the schema to a known-good state, or fail with [`InitError`].
pub async fn ensure_ready(meta: &Meta) -> Result<(), InitError> {
    let mut last_reason = String::new();
    for attempt in 1..=MAX_ATTEMPTS {
        if attempt > 1 {
            let delay = (BACKOFF_BASE_SECS << (attempt - 2)).min(BACKOFF_CAP_SECS);
            debug!(attempt, delay_secs = delay, "retrying schema bootstrap");
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
        match run_attempt(meta).await {
            Ok(()) => return Ok(()),
            Err(Failure::Fatal(reason)) => {
                return Err(InitError { attempts: attempt, reason });
            }
            Err(Failure::Retryable(reason)) => {
                warn!(attempt, %reason, "schema bootstrap attempt failed");
                last_reason = reason;
            }
        }
    }
    Err(InitError {
        attempts: MAX_ATTEMPTS,
        reason: last_reason,
    })
}

async fn run_attempt(meta: &Meta) -> Result<(), Failure> {
    meta.prepare("SELECT 1").first().await?;

    for table in schema::TABLES {
        let mut columns = table_columns(meta, table.name).await?;
        if columns.is_empty() {
            meta.prepare(table.create_sql).run().await?;
            columns = table_columns(meta, table.name).await?;
            if columns.is_empty() {
                return Err(Failure::Retryable(format!(
                    "table `{}` still missing after create",
                    table.name
                )));
            }
        }

        for required in table.columns {
            if column_present(&columns, required) {
                continue;
            }
            let alter = format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table.name, required.name, required.ty
            );
            match meta.prepare(alter).run().await {
                Ok(_) => {}
                // Lost the race with a concurrent bootstrap; the column is
                // there, which is all that matters.
                Err(err) if err.is_duplicate_column() => {}
                Err(err) => return Err(err.into()),
            }
        }

        // Re-verify after repair.
        let columns = table_columns(meta, table.name).await?;
        for required in table.columns {
            if !column_present(&columns, required) {
                return Err(Failure::Retryable(format!(
                    "column `{}.{}` missing after repair",
                    table.name, required.name
                )));
            }
        }
    }

    ensure_default_category(meta).await
}

async fn table_columns(meta: &Meta, table: &str) -> Result<Vec<Row>, MetaError> {
    meta.prepare(format!("PRAGMA table_info({table})")).all().await
}

/// Case-insensitive name match; prefix match on the declared type, so a
/// column declared `INTEGER NOT NULL` satisfies a required `INTEGER`.
fn column_present(columns: &[Row], required: &ColumnSpec) -> bool {
    columns.iter().any(|row| {
        let name_ok = row
            .text("name")
            .is_some_and(|n| n.eq_ignore_ascii_case(required.name));
        let type_ok = row
            .text("type")
            .is_some_and(|t| t.to_ascii_uppercase().starts_with(required.ty));
        name_ok && type_ok
    })
}

async fn ensure_default_category(meta: &Meta) -> Result<(), Failure> {
    let existing = meta
        .prepare("SELECT id, name, created_at FROM categories WHERE name = ?")
        .bind(DEFAULT_CATEGORY_NAME)
        .first()
        .await?;

    if existing.is_none() {
        meta.prepare("INSERT OR IGNORE INTO categories (name, created_at) VALUES (?, ?)")
            .bind(DEFAULT_CATEGORY_NAME)
            .bind(Utc::now().timestamp())
            .run()
            .await?;

        if let Some(row) = meta
            .prepare("SELECT id, name, created_at FROM categories WHERE name = ?")
            .bind(DEFAULT_CATEGORY_NAME)
            .first()
            .await?
        {
            let id = row.integer("id").unwrap_or_default();
            // Adopt rows orphaned while no default existed.
            meta.prepare("UPDATE files SET category_id = ? WHERE category_id IS NULL")
                .bind(id)
                .run()
                .await?;
            meta.prepare("UPDATE user_settings SET category_id = ? WHERE category_id IS NULL")
                .bind(id)
                .run()
                .await?;
        }
    }

    // The default category is load-bearing; if it cannot be read back the
    // store is unusable and retrying will not help.
    let confirmed = meta
        .prepare("SELECT id, name, created_at FROM categories WHERE name = ?")
        .bind(DEFAULT_CATEGORY_NAME)
        .first()
        .await?;
    if confirmed.is_none() {
        return Err(Failure::Fatal(
            "default category missing after bootstrap".to_string(),
        ));
    }
    Ok(())
}
