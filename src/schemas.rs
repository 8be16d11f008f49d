//! `shx schemas` and `shx schema <dataset>`.

use anyhow::{bail, Result};

use sheet_harness_core::models::SchemaRecord;
use sheet_harness_core::registry::SchemaRegistry;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Every stored schema version, oldest first.
pub async fn list_schemas(config: &Config) -> Result<Vec<SchemaRecord>> {
    let store = SqliteStore::new(db::connect_initialized(config).await?);
    let schemas = SchemaRegistry::new(&store).list_schemas().await?;
    store.close().await;

    if schemas.is_empty() {
        println!("No schemas stored. Run `shx import` first.");
        return Ok(schemas);
    }

    println!(
        "{:<24} {:<38} {:<26} {:>7}  SOURCE",
        "DATASET", "SCHEMA ID", "IMPORTED", "COLUMNS"
    );
    for s in &schemas {
        println!(
            "{:<24} {:<38} {:<26} {:>7}  {}",
            s.dataset_name,
            s.id,
            s.import_date.format("%Y-%m-%d %H:%M:%S UTC"),
            s.columns.len(),
            s.source_file
        );
    }
    Ok(schemas)
}

/// Latest schema for `dataset`, printed as JSON.
pub async fn show_schema(config: &Config, dataset: &str) -> Result<SchemaRecord> {
    let store = SqliteStore::new(db::connect_initialized(config).await?);
    let schema = SchemaRegistry::new(&store).get_schema(dataset).await?;
    store.close().await;

    let Some(schema) = schema else {
        bail!("No schema stored for dataset '{}'", dataset);
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(schema)
}
