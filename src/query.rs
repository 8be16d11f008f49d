//! `shx query`: filtered row retrieval from the SQLite store.

use anyhow::Result;

use sheet_harness_core::filter::FilterSpec;
use sheet_harness_core::query::{query_rows, QueryRequest, QueryResult};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Default)]
pub struct QueryArgs<'a> {
    /// `key=value` assignments; a key given twice ORs its values.
    pub filters: &'a [String],
    /// A JSON object of filters, merged before the assignments.
    pub filter_json: Option<&'a str>,
    pub dataset: Option<&'a str>,
    pub index: Option<&'a str>,
    pub limit: Option<usize>,
    pub json: bool,
}

/// Merge `--filter-json` and `--filter` into one spec.
pub fn build_filter_spec(args: &QueryArgs<'_>) -> Result<FilterSpec> {
    let mut spec = match args.filter_json {
        Some(json) => FilterSpec::from_json(json)?,
        None => FilterSpec::new(),
    };
    for assignment in args.filters {
        spec.push_assignment(assignment)?;
    }
    Ok(spec)
}

pub async fn run_query(config: &Config, args: &QueryArgs<'_>) -> Result<QueryResult> {
    let spec = build_filter_spec(args)?;
    let fuzzy = config.fuzzy();
    let parser = config.parser()?;
    let limit = args.limit.unwrap_or(config.retrieval.final_limit).max(1);

    let pool = db::connect_initialized(config).await?;
    let store = SqliteStore::new(pool);

    let request = QueryRequest {
        index: args.index.unwrap_or(&config.ingest.index),
        dataset: args.dataset,
        filters: &spec,
        fuzzy: &fuzzy,
        limit,
    };
    let result = query_rows(&store, &parser, &request).await?;
    store.close().await;

    for warning in &result.warnings {
        eprintln!("warning: {}", warning);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(result);
    }

    println!("filter: {}", result.predicate);
    if let Some(id) = &result.schema_id {
        println!("schema: {}", id);
    }
    if result.rows.is_empty() {
        println!("No rows found.");
        return Ok(result);
    }

    for (i, row) in result.rows.iter().enumerate() {
        let source = row.metadata.source.as_deref().unwrap_or("?");
        let number = row
            .metadata
            .row
            .map(|r| r.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!("{}. {} row {}", i + 1, source, number);
        for (key, value) in &row.data {
            println!("    {}: {}", key, value);
        }
    }
    println!("{} row(s)", result.rows.len());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheet_harness_core::filter::FieldRef;

    #[test]
    fn test_filter_spec_merges_json_and_assignments() {
        let filters = vec!["data.Environment=Production".to_string()];
        let args = QueryArgs {
            filters: &filters,
            filter_json: Some(r#"{"dataset_name": "servers"}"#),
            ..Default::default()
        };
        let spec = build_filter_spec(&args).unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(
            spec.values_for(&FieldRef::Tag("dataset_name".into())),
            Some(&["servers".to_string()][..])
        );
    }

    #[test]
    fn test_bad_assignment_is_an_error() {
        let filters = vec!["no-equals-sign".to_string()];
        let args = QueryArgs {
            filters: &filters,
            ..Default::default()
        };
        assert!(build_filter_spec(&args).is_err());
    }
}
