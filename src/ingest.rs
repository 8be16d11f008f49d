//! `shx import`: read sheet files and write their rows to the store.
//!
//! Each table is imported independently. A file that cannot be read, or a
//! table whose rows cannot be stored, is reported and skipped; the batch
//! carries on with the next one.

use anyhow::{bail, Result};
use std::path::Path;
use tracing::error;

use sheet_harness_core::diagnostics::{
    CollectingSink, Diagnostic, DiagnosticKind, DiagnosticSink, TracingSink,
};
use sheet_harness_core::ingest::{ingest_table, IngestOptions, IngestReport};

use crate::config::Config;
use crate::connector_sheets::discover_sheets;
use crate::db;
use crate::embedding::create_embedder;
use crate::progress::{ImportProgressEvent, ImportProgressReporter};
use crate::sheet_reader::read_sheets;
use crate::sqlite_store::SqliteStore;

/// CLI arguments for one import run.
#[derive(Debug, Clone, Default)]
pub struct ImportArgs<'a> {
    pub path: Option<&'a Path>,
    pub dataset: Option<&'a str>,
    pub index: Option<&'a str>,
    pub dry_run: bool,
    /// Maximum rows per table.
    pub limit: Option<usize>,
}

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub files: usize,
    pub files_failed: usize,
    pub tables: Vec<IngestReport>,
    pub tables_failed: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl ImportSummary {
    pub fn rows_written(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_written).sum()
    }

    fn sum(&self, f: impl Fn(&IngestReport) -> u64) -> u64 {
        self.tables.iter().map(f).sum()
    }
}

pub async fn run_import(
    config: &Config,
    args: &ImportArgs<'_>,
    progress: &dyn ImportProgressReporter,
) -> Result<ImportSummary> {
    let index = args.index.unwrap_or(&config.ingest.index);
    let root_label = args
        .path
        .map(|p| p.display().to_string())
        .or_else(|| {
            config
                .connectors
                .sheets
                .as_ref()
                .map(|c| c.root.display().to_string())
        })
        .unwrap_or_default();

    progress.report(ImportProgressEvent::Discovering {
        root: root_label.clone(),
    });
    let files = discover_sheets(config, args.path)?;
    let inferrer = config.inferrer()?;

    if args.dry_run {
        return dry_run(&files, args, &inferrer, &root_label);
    }

    let pool = db::connect_initialized(config).await?;
    let embedder = create_embedder(&config.embedding)?;
    let model = embedder
        .as_ref()
        .map(|e| e.model_name().to_string())
        .unwrap_or_else(|| "none".to_string());
    let store = SqliteStore::new(pool).with_model(&model);
    if let Some(embedder) = embedder.as_deref() {
        if let Some(stored) = store.stored_dims(embedder.model_name()).await? {
            if stored != embedder.dims() {
                store.close().await;
                bail!(
                    "vectors stored for model {} have {} dims but embedding.dims is {}",
                    embedder.model_name(),
                    stored,
                    embedder.dims()
                );
            }
        }
    }

    let sink = CollectingSink::tee(Box::new(TracingSink));
    let opts = IngestOptions {
        index,
        dataset_name: args.dataset,
        inferrer: &inferrer,
        embed_batch_size: config.embedding.batch_size.max(1),
        limit: args.limit,
    };

    let mut summary = ImportSummary {
        files: files.len(),
        ..Default::default()
    };
    let total = files.len() as u64;

    for (i, path) in files.iter().enumerate() {
        let file_label = path.display().to_string();
        progress.report(ImportProgressEvent::Importing {
            file: file_label.clone(),
            n: i as u64 + 1,
            total,
        });

        let tables = match read_sheets(path) {
            Ok(tables) => tables,
            Err(e) => {
                sink.emit(
                    Diagnostic::error(DiagnosticKind::SourceUnreadable, e.to_string())
                        .with_field("file", &file_label),
                );
                summary.files_failed += 1;
                continue;
            }
        };

        for table in &tables {
            match ingest_table(&store, embedder.as_deref(), table, &opts, &sink).await {
                Ok(report) => {
                    progress.report(ImportProgressEvent::Rows {
                        table: report.dataset_name.clone(),
                        rows: report.rows_written,
                    });
                    summary.tables.push(report);
                }
                Err(e) => {
                    error!(
                        file = %file_label,
                        table = %table.name,
                        error = %format!("{:#}", e),
                        "table import failed"
                    );
                    summary.tables_failed += 1;
                }
            }
        }
    }

    store.close().await;
    summary.diagnostics = sink.snapshot();
    print_summary(&summary, index, &root_label, embedder.is_some());
    Ok(summary)
}

fn dry_run(
    files: &[std::path::PathBuf],
    args: &ImportArgs<'_>,
    inferrer: &sheet_harness_core::infer::SchemaInferrer,
    root_label: &str,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary {
        files: files.len(),
        ..Default::default()
    };

    println!("import {} (dry-run)", root_label);
    println!("  files found: {}", files.len());

    for path in files {
        let tables = match read_sheets(path) {
            Ok(tables) => tables,
            Err(e) => {
                println!("  {}: unreadable ({})", path.display(), e);
                summary.files_failed += 1;
                continue;
            }
        };
        for table in &tables {
            let dataset = args.dataset.unwrap_or(&table.name);
            let draft = inferrer.draft(table, dataset);
            let rows = args
                .limit
                .map_or(table.rows.len(), |l| l.min(table.rows.len()));
            println!("  table {} ({}): {} rows", dataset, table.source_file, rows);
            for column in &draft.columns {
                println!(
                    "    {:<24} {:<8} {}",
                    column.normalized_name,
                    column.data_type.as_str(),
                    column.name
                );
            }
            summary.tables.push(IngestReport {
                dataset_name: dataset.to_string(),
                source_file: table.source_file.clone(),
                columns: draft.columns.len(),
                ..Default::default()
            });
        }
    }
    println!("ok");
    Ok(summary)
}

fn print_summary(summary: &ImportSummary, index: &str, root_label: &str, embeddings: bool) {
    println!("import {}", root_label);
    println!("  index: {}", index);
    println!("  files: {}", summary.files);
    println!("  tables imported: {}", summary.tables.len());
    println!("  rows written: {}", summary.rows_written());
    println!("  rows malformed: {}", summary.sum(|t| t.rows_malformed));
    if summary.files_failed > 0 {
        println!("  files failed: {}", summary.files_failed);
    }
    if summary.tables_failed > 0 {
        println!("  tables failed: {}", summary.tables_failed);
    }
    if !summary.diagnostics.is_empty() {
        println!("  diagnostics: {}", summary.diagnostics.len());
    }
    if embeddings {
        println!(
            "  embeddings written: {}",
            summary.sum(|t| t.embeddings_written)
        );
        println!(
            "  embeddings pending: {}",
            summary.sum(|t| t.embeddings_pending)
        );
    }
    for table in &summary.tables {
        println!(
            "  {} [{}] schema {}",
            table.dataset_name,
            table.source_file,
            table.schema_id.as_deref().unwrap_or("(none)")
        );
    }
    println!("ok");
}
