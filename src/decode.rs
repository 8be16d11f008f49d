//! `shx decode`: turn a stored row sentence back into a structured row.

use anyhow::Result;

use sheet_harness_core::models::DecodedRow;
use sheet_harness_core::parse::DecodeContext;
use sheet_harness_core::registry::SchemaRegistry;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Decode `text`, typing fields with the latest schema of `dataset` when
/// one is given. Diagnostics go to stderr.
pub async fn run_decode(
    config: &Config,
    text: &str,
    raw_json: Option<&str>,
    dataset: Option<&str>,
) -> Result<DecodedRow> {
    let parser = config.parser()?;

    let schema = match dataset {
        Some(d) => {
            let store = SqliteStore::new(db::connect_initialized(config).await?);
            let schema = SchemaRegistry::new(&store).get_schema(d).await?;
            store.close().await;
            if schema.is_none() {
                eprintln!("warning: no schema stored for dataset '{}'; decoding untyped", d);
            }
            schema
        }
        None => None,
    };

    let ctx = DecodeContext {
        schema: schema.as_ref(),
        index: Some(config.ingest.index.as_str()),
    };
    let decoded = parser.decode(text, raw_json, &ctx);
    for diagnostic in &decoded.diagnostics {
        eprintln!("{}", diagnostic);
    }
    println!("{}", serde_json::to_string_pretty(&decoded.row)?);
    Ok(decoded.row)
}
