//! Filtered row retrieval.
//!
//! The dataset schema (when one is known) drives field typing in the
//! predicate and in decoding. A registry failure only loses that typing;
//! the query still runs.

use anyhow::Result;
use serde::Serialize;
use tracing::warn;

use crate::diagnostics::Diagnostic;
use crate::filter::{FieldRef, FilterSpec};
use crate::models::{DecodedRow, SchemaRecord};
use crate::parse::{DecodeContext, SentenceParser};
use crate::predicate::{build_predicate, FilterWarning, FuzzyMatchConfig, Predicate};
use crate::registry::SchemaRegistry;
use crate::store::{RowStore, SchemaStore};

#[derive(Debug, Clone)]
pub struct QueryRequest<'a> {
    pub index: &'a str,
    /// Dataset whose schema types the filter. Also restricts results to
    /// that dataset unless the filter already names `dataset_name`.
    pub dataset: Option<&'a str>,
    pub filters: &'a FilterSpec,
    pub fuzzy: &'a FuzzyMatchConfig,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    #[serde(skip)]
    pub predicate: Predicate,
    pub schema_id: Option<String>,
    pub warnings: Vec<FilterWarning>,
    pub rows: Vec<DecodedRow>,
    pub diagnostics: Vec<Diagnostic>,
}

pub async fn query_rows<S>(
    store: &S,
    parser: &SentenceParser,
    req: &QueryRequest<'_>,
) -> Result<QueryResult>
where
    S: RowStore + SchemaStore + ?Sized,
{
    let dataset_tag = FieldRef::Tag("dataset_name".to_string());
    let mut filters = req.filters.clone();
    let named: Option<Vec<String>> = filters.values_for(&dataset_tag).map(<[String]>::to_vec);
    let dataset = match (req.dataset, named.as_deref()) {
        (Some(d), None) => {
            filters.insert("dataset_name", d);
            Some(d.to_string())
        }
        (Some(d), Some(_)) => Some(d.to_string()),
        (None, Some([only])) => Some(only.clone()),
        (None, _) => None,
    };

    let schema: Option<SchemaRecord> = match &dataset {
        Some(d) => match SchemaRegistry::new(store).get_schema(d).await {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    dataset = %d,
                    error = %format!("{:#}", e),
                    "schema lookup failed; querying untyped"
                );
                None
            }
        },
        None => None,
    };

    let built = build_predicate(&filters, req.fuzzy, schema.as_ref());
    let chunks = store.run_query(req.index, &built.predicate, req.limit).await?;

    let ctx = DecodeContext {
        schema: schema.as_ref(),
        index: Some(req.index),
    };
    let mut rows = Vec::with_capacity(chunks.len());
    let mut diagnostics: Vec<Diagnostic> =
        built.warnings.iter().map(FilterWarning::to_diagnostic).collect();
    for chunk in &chunks {
        let decoded = parser.decode(&chunk.text, chunk.raw_json.as_deref(), &ctx);
        diagnostics.extend(decoded.diagnostics);
        rows.push(decoded.row);
    }

    Ok(QueryResult {
        predicate: built.predicate,
        schema_id: schema.map(|s| s.id),
        warnings: built.warnings,
        rows,
        diagnostics,
    })
}
