//! Idempotent schema creation for `shx init`.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_tables(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    // One row per encoded spreadsheet row
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS row_chunks (
            id TEXT PRIMARY KEY,
            index_name TEXT NOT NULL,
            seq INTEGER NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            data_json TEXT NOT NULL DEFAULT '{}',
            raw_json TEXT,
            hash TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS row_vectors (
            chunk_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            hash TEXT NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES row_chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Dataset schemas; the full record is kept as camelCase JSON
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schemas (
            id TEXT PRIMARY KEY,
            index_name TEXT NOT NULL,
            dataset_name TEXT NOT NULL,
            import_date TEXT NOT NULL,
            import_batch_id TEXT NOT NULL,
            record_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_row_chunks_index ON row_chunks(index_name)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_schemas_dataset ON schemas(dataset_name)")
        .execute(pool)
        .await?;

    Ok(())
}
