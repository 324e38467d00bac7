use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::error::PersistenceError;

pub async fn connect(db_path: &Path) -> Result<SqlitePool, PersistenceError> {
    let display = db_path.display().to_string();
    let connect_err = |source| PersistenceError::Connect {
        path: display.clone(),
        source,
    };

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::Io(parent.display().to_string(), e))?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", display))
        .map_err(connect_err)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(connect_err)
}
