//! SQLite connection handling.

use anyhow::{bail, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Connect and make sure `shx init` has created the tables.
pub async fn connect_initialized(config: &Config) -> Result<SqlitePool> {
    let pool = connect(config).await?;
    let ready: bool = sqlx::query_scalar(
        "SELECT COUNT(*) = 3 FROM sqlite_master WHERE type = 'table' AND name IN ('row_chunks', 'row_vectors', 'schemas')",
    )
    .fetch_one(&pool)
    .await?;
    if !ready {
        pool.close().await;
        bail!(
            "database at {} is not initialized; run `shx init` first",
            config.db.path.display()
        );
    }
    Ok(pool)
}
