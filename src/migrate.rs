use anyhow::{bail, Result};
use sqlx::{Executor, Sqlite};

use crate::config::{is_valid_identifier, Config};
use crate::db;

/// `CREATE TABLE IF NOT EXISTS` for the destination table.
///
/// Append-only: no primary key or uniqueness constraint, so re-running a
/// date appends a duplicate row.
pub fn create_table_sql(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            location_name TEXT,
            location_region TEXT,
            location_country TEXT,
            location_lat REAL,
            location_lon REAL,
            location_tz_id TEXT,
            location_localtime_epoch INTEGER,
            location_localtime TEXT,
            forecastday_date TEXT,
            params TEXT
        )
        "#
    )
}

/// Create `table` if it does not exist. `table` must already be validated.
pub async fn ensure_table<'e, E>(executor: E, table: &str) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(&create_table_sql(table))
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let table = &config.pipeline.table;
    if !is_valid_identifier(table) {
        bail!("pipeline.table must be a plain SQL identifier, got '{}'", table);
    }

    let pool = db::connect(&config.db.path).await?;
    ensure_table(&pool, table).await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_forecastday_date ON {table}(forecastday_date)"
    ))
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
