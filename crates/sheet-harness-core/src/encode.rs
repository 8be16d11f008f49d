//! Row sentence encoder.
//!
//! A row becomes one line of text that reads naturally for an embedding
//! model and can still be parsed back into fields:
//!
//! ```text
//! Record from worksheet Servers, row 5: schema_id is 9f…. Server is SVR01. Port is 8080.
//! ```
//!
//! Keys are normalized column names, values are rendered with
//! [`CellValue::render`]. The identifiers `schema_id` and
//! `import_batch_id` are written first when present; row fields with
//! those names, or with a leading underscore, are never emitted.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::models::{ChunkMetadata, ColumnDescriptor, RawRow, RowChunk, DOCUMENT_TYPE_ROW};
use crate::value::CellValue;

pub const RECORD_PREFIX: &str = "Record from worksheet";
pub const SCHEMA_ID_KEY: &str = "schema_id";
pub const IMPORT_BATCH_ID_KEY: &str = "import_batch_id";

/// Where a row came from and which import it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct EncodeContext<'a> {
    pub source_name: &'a str,
    pub row_number: u64,
    pub schema_id: Option<&'a str>,
    pub import_batch_id: Option<&'a str>,
}

/// `schema_id` and `import_batch_id` belong to metadata, never to row data.
pub fn is_reserved_key(key: &str) -> bool {
    key == SCHEMA_ID_KEY || key == IMPORT_BATCH_ID_KEY
}

/// Encode one row as a sentence.
pub fn encode_row(row: &[(String, CellValue)], ctx: &EncodeContext<'_>) -> String {
    let mut text = format!(
        "{} {}, row {}: ",
        RECORD_PREFIX,
        single_line(ctx.source_name),
        ctx.row_number
    );

    if let Some(id) = ctx.schema_id.filter(|s| !s.is_empty()) {
        text.push_str(&format!("{} is {}. ", SCHEMA_ID_KEY, id));
    }
    if let Some(id) = ctx.import_batch_id.filter(|s| !s.is_empty()) {
        text.push_str(&format!("{} is {}. ", IMPORT_BATCH_ID_KEY, id));
    }

    for (key, value) in row {
        if key.starts_with('_') || is_reserved_key(key) {
            continue;
        }
        text.push_str(&format!("{} is {}. ", key, single_line(&value.render())));
    }

    let trimmed = text.trim_end().len();
    text.truncate(trimmed);
    text
}

fn single_line(s: &str) -> String {
    s.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

/// Coerce a raw row against the schema columns.
///
/// Cells that do not fit their column type are kept as text and reported
/// as [`DiagnosticKind::MalformedInput`]; so are cells beyond the last
/// header, which are dropped.
pub fn typed_row(
    columns: &[ColumnDescriptor],
    raw: &RawRow,
    source_name: &str,
) -> (Vec<(String, CellValue)>, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let mut row = Vec::with_capacity(columns.len());

    for (idx, column) in columns.iter().enumerate() {
        let cell = raw.cells.get(idx).map(String::as_str).unwrap_or("");
        let value = match column.try_coerce(cell) {
            Some(v) => v,
            None => {
                diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticKind::MalformedInput,
                        format!(
                            "cell does not match inferred {} type; kept as text",
                            column.data_type.as_str()
                        ),
                    )
                    .with_field("source", source_name)
                    .with_field("row", raw.number)
                    .with_field("column", &column.normalized_name),
                );
                CellValue::String(cell.trim().to_string())
            }
        };
        row.push((column.normalized_name.clone(), value));
    }

    let extra = raw
        .cells
        .iter()
        .skip(columns.len())
        .filter(|c| !c.trim().is_empty())
        .count();
    if extra > 0 {
        diagnostics.push(
            Diagnostic::warning(
                DiagnosticKind::MalformedInput,
                format!("{} cell(s) beyond the header row were dropped", extra),
            )
            .with_field("source", source_name)
            .with_field("row", raw.number),
        );
    }

    (row, diagnostics)
}

/// Identity of the import a chunk belongs to.
#[derive(Debug, Clone, Copy)]
pub struct ChunkContext<'a> {
    pub source_name: &'a str,
    pub dataset_name: &'a str,
    pub schema_id: Option<&'a str>,
    pub import_batch_id: Option<&'a str>,
}

/// Assemble a [`RowChunk`]: sentence, tag metadata, structured data
/// mirror, and the raw side channel built from the original headers.
pub fn build_row_chunk(
    seq: u64,
    headers: &[String],
    raw: &RawRow,
    row: &[(String, CellValue)],
    ctx: &ChunkContext<'_>,
) -> RowChunk {
    let text = encode_row(
        row,
        &EncodeContext {
            source_name: ctx.source_name,
            row_number: raw.number,
            schema_id: ctx.schema_id,
            import_batch_id: ctx.import_batch_id,
        },
    );

    let data: BTreeMap<String, CellValue> = row
        .iter()
        .filter(|(k, _)| !k.starts_with('_') && !is_reserved_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let pairs: Vec<(&str, &str)> = headers
        .iter()
        .enumerate()
        .map(|(idx, h)| {
            (
                h.as_str(),
                raw.cells.get(idx).map(String::as_str).unwrap_or(""),
            )
        })
        .collect();
    let raw_json = serde_json::to_string(&pairs).ok();

    RowChunk {
        id: uuid::Uuid::new_v4().to_string(),
        seq,
        hash: content_hash(&text),
        text,
        metadata: ChunkMetadata {
            source_name: ctx.source_name.to_string(),
            row_number: raw.number,
            dataset_name: ctx.dataset_name.to_string(),
            schema_id: ctx.schema_id.map(str::to_string),
            import_batch_id: ctx.import_batch_id.map(str::to_string),
            document_type: DOCUMENT_TYPE_ROW.to_string(),
        },
        data,
        raw_json,
    }
}

/// Hex SHA-256 of the chunk text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
