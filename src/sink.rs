//! Relational sink: bulk-append flattened rows into the destination table.
//!
//! Every [`RelationalSink::append`] opens its own pool, creates the table on
//! first use, inserts all rows in one transaction, and closes the pool on
//! every exit path. Nothing is retried.

use std::path::{Path, PathBuf};

use sqlx::SqlitePool;

use crate::config::{is_valid_identifier, DbConfig};
use crate::db;
use crate::error::PersistenceError;
use crate::migrate::ensure_table;
use crate::models::FlattenedRow;

pub struct RelationalSink {
    db_path: PathBuf,
}

impl RelationalSink {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn from_config(config: &DbConfig) -> Self {
        Self::new(config.path.clone())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Append `rows` to `table`, returning the number of rows written.
    pub async fn append(&self, table: &str, rows: &[FlattenedRow]) -> Result<u64, PersistenceError> {
        if !is_valid_identifier(table) {
            return Err(PersistenceError::InvalidTable(table.to_string()));
        }

        let pool = db::connect(&self.db_path).await?;
        let result = insert_rows(&pool, table, rows).await;
        pool.close().await;

        result.map_err(|source| PersistenceError::Write {
            table: table.to_string(),
            source,
        })
    }

    /// Number of rows currently in `table` (0 if it does not exist yet).
    pub async fn count_rows(&self, table: &str) -> Result<i64, PersistenceError> {
        if !is_valid_identifier(table) {
            return Err(PersistenceError::InvalidTable(table.to_string()));
        }

        let pool = db::connect(&self.db_path).await?;
        let result = count(&pool, table).await;
        pool.close().await;

        result.map_err(|source| PersistenceError::Write {
            table: table.to_string(),
            source,
        })
    }
}

async fn insert_rows(
    pool: &SqlitePool,
    table: &str,
    rows: &[FlattenedRow],
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    ensure_table(&mut *tx, table).await?;

    let sql = format!(
        r#"
        INSERT INTO {table} (
            location_name, location_region, location_country, location_lat, location_lon,
            location_tz_id, location_localtime_epoch, location_localtime, forecastday_date, params
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#
    );

    let mut written = 0u64;
    for row in rows {
        let result = sqlx::query(&sql)
            .bind(&row.location_name)
            .bind(&row.location_region)
            .bind(&row.location_country)
            .bind(row.location_lat)
            .bind(row.location_lon)
            .bind(&row.location_tz_id)
            .bind(row.location_localtime_epoch)
            .bind(&row.location_localtime)
            .bind(&row.forecastday_date)
            .bind(&row.params)
            .execute(&mut *tx)
            .await?;
        written += result.rows_affected();
    }

    tx.commit().await?;
    Ok(written)
}

async fn count(pool: &SqlitePool, table: &str) -> Result<i64, sqlx::Error> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
    )
    .bind(table)
    .fetch_one(pool)
    .await?;

    if !exists {
        return Ok(0);
    }

    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
}
