//! Table import pipeline.
//!
//! ```text
//! SheetTable → infer columns → register schema → typed rows → RowChunks
//!            → embed (optional, non-fatal) → RowStore::persist
//! ```
//!
//! Recoverable problems are reported through the [`DiagnosticSink`];
//! store write failures abort the table and are returned to the caller,
//! which decides whether to continue with the next table.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::embedding::Embedder;
use crate::encode::{build_row_chunk, typed_row, ChunkContext};
use crate::infer::SchemaInferrer;
use crate::models::{RowChunk, SheetTable};
use crate::registry::SchemaRegistry;
use crate::store::{RowStore, SchemaStore};

/// Per-import settings.
#[derive(Debug, Clone)]
pub struct IngestOptions<'a> {
    pub index: &'a str,
    /// Overrides the table name as dataset name.
    pub dataset_name: Option<&'a str>,
    pub inferrer: &'a SchemaInferrer,
    /// Texts per embedder call.
    pub embed_batch_size: usize,
    /// Stop after this many rows.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub dataset_name: String,
    pub source_file: String,
    pub schema_id: Option<String>,
    pub import_batch_id: String,
    pub columns: usize,
    pub rows_written: u64,
    pub rows_malformed: u64,
    pub embeddings_written: u64,
    pub embeddings_pending: u64,
}

/// Import one table into `store`.
pub async fn ingest_table<S>(
    store: &S,
    embedder: Option<&dyn Embedder>,
    table: &SheetTable,
    opts: &IngestOptions<'_>,
    sink: &dyn DiagnosticSink,
) -> Result<IngestReport>
where
    S: RowStore + SchemaStore + ?Sized,
{
    let dataset_name = opts.dataset_name.unwrap_or(&table.name);
    let draft = opts.inferrer.draft(table, dataset_name);

    let registration = SchemaRegistry::new(store)
        .try_store_schema(&draft, opts.index, sink)
        .await;

    let mut report = IngestReport {
        dataset_name: dataset_name.to_string(),
        source_file: table.source_file.clone(),
        schema_id: registration.schema_id().map(str::to_string),
        import_batch_id: registration.import_batch_id.clone(),
        columns: draft.columns.len(),
        ..Default::default()
    };

    let ctx = ChunkContext {
        source_name: &table.name,
        dataset_name,
        schema_id: registration.schema_id(),
        import_batch_id: Some(&registration.import_batch_id),
    };

    let limit = opts.limit.unwrap_or(usize::MAX);
    let mut chunks: Vec<RowChunk> = Vec::with_capacity(table.rows.len().min(limit));
    for (seq, raw) in table.rows.iter().take(limit).enumerate() {
        let (row, diagnostics) = typed_row(&draft.columns, raw, &table.name);
        if !diagnostics.is_empty() {
            report.rows_malformed += 1;
            sink.emit_all(diagnostics);
        }
        chunks.push(build_row_chunk(seq as u64, &table.headers, raw, &row, &ctx));
    }

    let batch_size = opts.embed_batch_size.max(1);
    for batch in chunks.chunks(batch_size) {
        let vectors = match embedder {
            Some(embedder) => embed_batch(embedder, batch, sink).await,
            None => None,
        };

        for (i, chunk) in batch.iter().enumerate() {
            let vector = vectors.as_ref().and_then(|v| v.get(i)).map(Vec::as_slice);
            store
                .persist(opts.index, chunk, vector)
                .await
                .with_context(|| {
                    format!(
                        "persisting row {} of {}",
                        chunk.metadata.row_number, table.source_file
                    )
                })?;
            report.rows_written += 1;
            if vector.is_some() {
                report.embeddings_written += 1;
            } else if embedder.is_some() {
                report.embeddings_pending += 1;
            }
        }
        debug!(rows = report.rows_written, dataset = %dataset_name, "batch persisted");
    }

    info!(
        dataset = %report.dataset_name,
        rows = report.rows_written,
        columns = report.columns,
        schema_id = report.schema_id.as_deref().unwrap_or("-"),
        "table imported"
    );
    Ok(report)
}

/// Embed a batch; failures and short responses become diagnostics.
async fn embed_batch(
    embedder: &dyn Embedder,
    batch: &[RowChunk],
    sink: &dyn DiagnosticSink,
) -> Option<Vec<Vec<f32>>> {
    let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
    match embedder.embed_texts(&texts).await {
        Ok(vectors) if vectors.len() != texts.len() => {
            sink.emit(
                Diagnostic::warning(
                    DiagnosticKind::EmbeddingFailure,
                    "embedder returned the wrong number of vectors; rows stored without vectors",
                )
                .with_field("expected", texts.len())
                .with_field("got", vectors.len()),
            );
            None
        }
        Ok(vectors) => match vectors.iter().map(Vec::len).find(|&n| n != embedder.dims()) {
            Some(got) => {
                sink.emit(
                    Diagnostic::warning(
                        DiagnosticKind::EmbeddingFailure,
                        "embedder returned vectors of the wrong size; rows stored without vectors",
                    )
                    .with_field("model", embedder.model_name())
                    .with_field("expected", embedder.dims())
                    .with_field("got", got),
                );
                None
            }
            None => Some(vectors),
        },
        Err(e) => {
            sink.emit(
                Diagnostic::warning(
                    DiagnosticKind::EmbeddingFailure,
                    format!("embedding failed; rows stored without vectors: {:#}", e),
                )
                .with_field("model", embedder.model_name())
                .with_field("rows", texts.len()),
            );
            None
        }
    }
}
