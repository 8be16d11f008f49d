//! Core data models.
//!
//! These types flow through the whole pipeline:
//!
//! ```text
//! SheetTable ──▶ SchemaInferrer ──▶ SchemaDraft ──▶ SchemaRegistry ──▶ SchemaRecord
//!     │                                                                   │
//!     └──────────────▶ encode::build_row_chunk ──▶ RowChunk ──▶ RowStore ◀┘
//!                                                     │
//!                          SentenceParser::decode ◀───┘──▶ DecodedRow
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::{parse_bool, parse_date, parse_number, CellValue};

/// `metadata.document_type` of a schema record.
pub const DOCUMENT_TYPE_SCHEMA: &str = "schema";
/// `metadata.document_type` of a row chunk.
pub const DOCUMENT_TYPE_ROW: &str = "row";

/// Inferred column type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    String,
    Number,
    Boolean,
    Date,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
        }
    }
}

/// One column of a dataset schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    /// Header text exactly as it appeared in the source.
    pub name: String,
    pub normalized_name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub is_required: bool,
    /// Distinct sample values in first-seen order.
    #[serde(default)]
    pub common_values: Vec<String>,
}

impl ColumnDescriptor {
    /// Coerce a raw cell to this column's type.
    ///
    /// Blank cells become [`CellValue::Null`]. Returns `None` when a
    /// non-blank cell does not fit the column type.
    pub fn try_coerce(&self, raw: &str) -> Option<CellValue> {
        let t = raw.trim();
        if t.is_empty() {
            return Some(CellValue::Null);
        }
        match self.data_type {
            DataType::String => Some(CellValue::String(t.to_string())),
            DataType::Number => parse_number(t).map(CellValue::Number),
            DataType::Boolean => parse_bool(t).map(CellValue::Bool),
            DataType::Date => parse_date(t).map(CellValue::Date),
        }
    }

    /// Like [`try_coerce`](Self::try_coerce) but falls back to the
    /// trimmed text when the cell does not fit.
    pub fn coerce(&self, raw: &str) -> CellValue {
        self.try_coerce(raw)
            .unwrap_or_else(|| CellValue::String(raw.trim().to_string()))
    }
}

/// Columns inferred for one table, before the registry assigns ids.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDraft {
    pub dataset_name: String,
    pub source_file: String,
    pub columns: Vec<ColumnDescriptor>,
}

/// A persisted dataset schema. Serialized in camelCase, which is the
/// shape stored by schema stores and printed by `shx schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRecord {
    pub id: String,
    pub dataset_name: String,
    pub source_file: String,
    pub import_date: DateTime<Utc>,
    pub import_batch_id: String,
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default = "schema_metadata")]
    pub metadata: BTreeMap<String, String>,
}

pub fn schema_metadata() -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert("document_type".to_string(), DOCUMENT_TYPE_SCHEMA.to_string());
    m
}

impl SchemaRecord {
    /// Look up a column by normalized name, case-insensitively.
    pub fn column(&self, normalized_name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.normalized_name.eq_ignore_ascii_case(normalized_name))
    }
}

/// One row of a source table, cells in header order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// Physical row number in the source; the header is row 1.
    pub number: u64,
    pub cells: Vec<String>,
}

/// A header row plus data rows read from one CSV file or one worksheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetTable {
    /// File stem for CSV, sheet name for XLSX.
    pub name: String,
    pub source_file: String,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Tag metadata stored alongside every row chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_name: String,
    pub row_number: u64,
    pub dataset_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_batch_id: Option<String>,
    pub document_type: String,
}

impl ChunkMetadata {
    /// Tag value by (lowercase) name, as a filter would see it.
    pub fn tag(&self, name: &str) -> Option<String> {
        match name {
            "source_name" => Some(self.source_name.clone()),
            "row_number" => Some(self.row_number.to_string()),
            "dataset_name" => Some(self.dataset_name.clone()),
            "schema_id" => self.schema_id.clone(),
            "import_batch_id" => self.import_batch_id.clone(),
            "document_type" => Some(self.document_type.clone()),
            _ => None,
        }
    }
}

/// An encoded row ready for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct RowChunk {
    pub id: String,
    /// Position of the row within its import.
    pub seq: u64,
    /// The row sentence.
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Structured mirror of the encoded fields, keyed by normalized name.
    pub data: BTreeMap<String, CellValue>,
    /// Raw pre-normalization row, serialized as `[[header, cell], ...]`.
    pub raw_json: Option<String>,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// Source details recovered while decoding a row sentence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
}

/// A row reconstructed from its sentence (or side channel).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecodedRow {
    pub data: BTreeMap<String, CellValue>,
    pub metadata: SourceMetadata,
}

impl DecodedRow {
    /// Field value by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.data.get(name).or_else(|| {
            self.data
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(data_type: DataType) -> ColumnDescriptor {
        ColumnDescriptor {
            name: "Port".into(),
            normalized_name: "Port".into(),
            data_type,
            is_required: true,
            common_values: vec![],
        }
    }

    #[test]
    fn test_coerce_by_type() {
        assert_eq!(
            column(DataType::Number).coerce("8080"),
            CellValue::Number(8080.0)
        );
        assert_eq!(
            column(DataType::Boolean).coerce("TRUE"),
            CellValue::Bool(true)
        );
        assert_eq!(
            column(DataType::String).coerce(" 007 "),
            CellValue::String("007".into())
        );
        assert_eq!(column(DataType::Date).coerce("  "), CellValue::Null);
    }

    #[test]
    fn test_coerce_mismatch_falls_back_to_text() {
        let c = column(DataType::Number);
        assert_eq!(c.try_coerce("n/a"), None);
        assert_eq!(c.coerce("n/a"), CellValue::String("n/a".into()));
    }

    #[test]
    fn test_schema_record_serializes_camel_case() {
        let record = SchemaRecord {
            id: "s1".into(),
            dataset_name: "Servers".into(),
            source_file: "servers.csv".into(),
            import_date: Utc::now(),
            import_batch_id: "b1".into(),
            columns: vec![column(DataType::Number)],
            metadata: schema_metadata(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["datasetName"], "Servers");
        assert_eq!(json["importBatchId"], "b1");
        assert_eq!(json["columns"][0]["normalizedName"], "Port");
        assert_eq!(json["columns"][0]["dataType"], "number");
        assert_eq!(json["metadata"]["document_type"], "schema");

        let back: SchemaRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_column_lookup_ignores_case() {
        let record = SchemaRecord {
            id: "s1".into(),
            dataset_name: "d".into(),
            source_file: "f".into(),
            import_date: Utc::now(),
            import_batch_id: "b".into(),
            columns: vec![column(DataType::Number)],
            metadata: schema_metadata(),
        };
        assert!(record.column("port").is_some());
        assert!(record.column("Owner").is_none());
    }
}
