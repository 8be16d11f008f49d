//! Sentence parser: the inverse of [`crate::encode`].
//!
//! Decoding order:
//!
//! 1. A valid side channel (the raw row JSON stored next to the chunk)
//!    supplies the data fields; the sentence then only contributes
//!    source metadata.
//! 2. Text carrying a second record prefix is cut before it.
//! 3. The prefix `Record from worksheet <source>, row <n>:` is matched
//!    on the first `, row <digits>:` so source names may contain commas.
//! 4. The body is split on `". "`, each fragment on its first `" is "`.
//!    Only the last fragment loses a trailing `.`.
//! 5. `schema_id` / `import_batch_id` fragments go to metadata.
//!
//! Text without the prefix is kept whole under the default content key.

use std::collections::BTreeMap;

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::encode::{IMPORT_BATCH_ID_KEY, RECORD_PREFIX, SCHEMA_ID_KEY};
use crate::header::HeaderNormalizer;
use crate::models::{DataType, DecodedRow, SchemaRecord};
use crate::value::{parse_date, CellValue, NULL_LITERAL};

pub const DEFAULT_CONTENT_KEY: &str = "content";

const ROW_MARKER: &str = ", row ";

/// Optional schema and index name used while decoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeContext<'a> {
    /// When present, string columns keep their text verbatim and date
    /// columns decode to dates.
    pub schema: Option<&'a SchemaRecord>,
    pub index: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub row: DecodedRow,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct SentenceParser {
    default_key: String,
    normalizer: HeaderNormalizer,
}

impl Default for SentenceParser {
    fn default() -> Self {
        Self {
            default_key: DEFAULT_CONTENT_KEY.to_string(),
            normalizer: HeaderNormalizer::default(),
        }
    }
}

impl SentenceParser {
    /// `normalizer` must match the one used at import time so that side
    /// channel headers land on the same column names.
    pub fn new(default_key: impl Into<String>, normalizer: HeaderNormalizer) -> Self {
        Self {
            default_key: default_key.into(),
            normalizer,
        }
    }

    pub fn decode(
        &self,
        text: &str,
        side_channel: Option<&str>,
        ctx: &DecodeContext<'_>,
    ) -> Decoded {
        let mut diagnostics = Vec::new();
        let mut row = DecodedRow::default();
        row.metadata.index = ctx.index.map(str::to_string);

        let side_data = side_channel
            .filter(|s| !s.trim().is_empty())
            .and_then(|raw| match self.decode_side_channel(raw, ctx) {
                Ok(data) => Some(data),
                Err(reason) => {
                    diagnostics.push(
                        Diagnostic::warning(
                            DiagnosticKind::MalformedInput,
                            "side channel unreadable; falling back to sentence text",
                        )
                        .with_field("reason", reason),
                    );
                    None
                }
            });

        let text = truncate_concatenated(text.trim(), &mut diagnostics);

        let text_data = match split_prefix(text) {
            Some((source, number, body)) => {
                row.metadata.source = Some(source.to_string());
                row.metadata.row = Some(number);
                self.parse_body(body, &mut row, ctx, &mut diagnostics)
            }
            None => {
                let mut data = BTreeMap::new();
                if side_data.is_none() && !text.is_empty() {
                    diagnostics.push(
                        Diagnostic::info(
                            DiagnosticKind::MalformedInput,
                            "text has no record prefix; kept as opaque content",
                        )
                        .with_field("key", &self.default_key),
                    );
                    data.insert(self.default_key.clone(), CellValue::String(text.to_string()));
                }
                data
            }
        };

        row.data = side_data.unwrap_or(text_data);
        Decoded { row, diagnostics }
    }

    fn parse_body(
        &self,
        body: &str,
        row: &mut DecodedRow,
        ctx: &DecodeContext<'_>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> BTreeMap<String, CellValue> {
        let body = body.trim();
        let mut fields: Vec<(String, String)> = Vec::new();
        if body.is_empty() {
            return BTreeMap::new();
        }

        let fragments: Vec<&str> = body.split(". ").collect();
        let last = fragments.len() - 1;

        for (idx, fragment) in fragments.into_iter().enumerate() {
            let fragment = if idx == last {
                fragment.strip_suffix('.').unwrap_or(fragment)
            } else {
                fragment
            };
            // Empty fragments after a field come from ". . " inside its value.
            if fragment.trim().is_empty() && fields.is_empty() {
                continue;
            }

            let pair = fragment
                .split_once(" is ")
                .or_else(|| fragment.strip_suffix(" is").map(|k| (k, "")));

            let Some((key, value)) = pair else {
                match fields.last_mut() {
                    Some((_, previous)) => {
                        previous.push_str(". ");
                        previous.push_str(fragment);
                    }
                    None => diagnostics.push(
                        Diagnostic::warning(
                            DiagnosticKind::MalformedInput,
                            "fragment without ' is ' skipped",
                        )
                        .with_field("fragment", fragment),
                    ),
                }
                continue;
            };

            let key = key.trim();
            if key.is_empty() {
                diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticKind::MalformedInput,
                        "fragment with empty key skipped",
                    )
                    .with_field("fragment", fragment),
                );
                continue;
            }
            if looks_like_prefix(key) {
                diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticKind::DecodeAmbiguity,
                        "prefix-like key skipped",
                    )
                    .with_field("key", key),
                );
                continue;
            }

            match key {
                SCHEMA_ID_KEY => row.metadata.schema_id = Some(value.trim().to_string()),
                IMPORT_BATCH_ID_KEY => {
                    row.metadata.import_batch_id = Some(value.trim().to_string())
                }
                _ => fields.push((key.to_string(), value.to_string())),
            }
        }

        fields
            .into_iter()
            .map(|(key, value)| {
                let cell = coerce_fragment(&key, &value, ctx.schema);
                (key, cell)
            })
            .collect()
    }

    fn decode_side_channel(
        &self,
        raw: &str,
        ctx: &DecodeContext<'_>,
    ) -> Result<BTreeMap<String, CellValue>, String> {
        let parsed: serde_json::Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;

        let pairs: Vec<(String, serde_json::Value)> = match parsed {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::Array(pair) => {
                        match <[serde_json::Value; 2]>::try_from(pair) {
                            Ok([serde_json::Value::String(header), value]) => Ok((header, value)),
                            _ => Err("pair must be [string, value]".to_string()),
                        }
                    }
                    _ => Err("expected an array of [header, value] pairs".to_string()),
                })
                .collect::<Result<_, _>>()?,
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => return Err("side channel must be an object or an array of pairs".to_string()),
        };

        let headers: Vec<&str> = pairs.iter().map(|(h, _)| h.as_str()).collect();
        let names = self.normalizer.normalize_all(&headers);

        Ok(names
            .into_iter()
            .zip(pairs)
            .map(|(name, (_, value))| {
                let cell = match value {
                    serde_json::Value::String(s) => {
                        let t = s.trim();
                        if t.is_empty() {
                            CellValue::Null
                        } else {
                            coerce_fragment(&name, t, ctx.schema)
                        }
                    }
                    other => CellValue::from_json(&other),
                };
                (name, cell)
            })
            .collect())
    }
}

/// Cut everything from the second record prefix onward.
fn truncate_concatenated<'t>(text: &'t str, diagnostics: &mut Vec<Diagnostic>) -> &'t str {
    let Some(first) = text.find(RECORD_PREFIX) else {
        return text;
    };
    let after_first = first + RECORD_PREFIX.len();
    match text[after_first..].find(RECORD_PREFIX) {
        Some(offset) => {
            let cut = after_first + offset;
            diagnostics.push(
                Diagnostic::warning(
                    DiagnosticKind::DecodeAmbiguity,
                    "text contains more than one record; decoding the first",
                )
                .with_field("discarded_bytes", text.len() - cut),
            );
            text[..cut].trim_end()
        }
        None => text,
    }
}

/// `(source, row number, body)` when `text` starts with a record prefix.
fn split_prefix(text: &str) -> Option<(&str, u64, &str)> {
    let rest = text.strip_prefix(RECORD_PREFIX)?.strip_prefix(' ')?;

    let mut search_from = 0;
    while let Some(pos) = rest[search_from..].find(ROW_MARKER) {
        let start = search_from + pos;
        let after = &rest[start + ROW_MARKER.len()..];
        let digits = after.bytes().take_while(|b| b.is_ascii_digit()).count();
        if digits > 0 && after[digits..].starts_with(':') {
            if let Ok(number) = after[..digits].parse::<u64>() {
                return Some((&rest[..start], number, &after[digits + 1..]));
            }
        }
        search_from = start + ROW_MARKER.len();
    }
    None
}

fn looks_like_prefix(key: &str) -> bool {
    key.to_ascii_lowercase()
        .contains(&RECORD_PREFIX.to_ascii_lowercase())
}

/// Typed value for one decoded fragment.
fn coerce_fragment(key: &str, value: &str, schema: Option<&SchemaRecord>) -> CellValue {
    if value == NULL_LITERAL {
        return CellValue::Null;
    }
    match schema.and_then(|s| s.column(key)).map(|c| c.data_type) {
        Some(DataType::String) => CellValue::String(value.to_string()),
        Some(DataType::Date) => parse_date(value)
            .map(CellValue::Date)
            .unwrap_or_else(|| CellValue::from_text(value)),
        _ => CellValue::from_text(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{encode_row, EncodeContext};
    use crate::models::{schema_metadata, ColumnDescriptor};
    use chrono::{NaiveDate, Utc};

    fn decode(text: &str) -> Decoded {
        SentenceParser::default().decode(text, None, &DecodeContext::default())
    }

    fn s(v: &str) -> CellValue {
        CellValue::String(v.to_string())
    }

    #[test]
    fn test_decode_basic_sentence() {
        let d = decode("Record from worksheet Servers, row 5: Server is SVR01. Port is 8080.");
        assert_eq!(d.row.metadata.source.as_deref(), Some("Servers"));
        assert_eq!(d.row.metadata.row, Some(5));
        assert_eq!(d.row.data["Server"], s("SVR01"));
        assert_eq!(d.row.data["Port"], CellValue::Number(8080.0));
        assert!(d.diagnostics.is_empty());
    }

    #[test]
    fn test_identifiers_routed_to_metadata() {
        let d = decode(
            "Record from worksheet S, row 2: schema_id is abc. import_batch_id is def. A is true.",
        );
        assert_eq!(d.row.metadata.schema_id.as_deref(), Some("abc"));
        assert_eq!(d.row.metadata.import_batch_id.as_deref(), Some("def"));
        assert_eq!(d.row.data.len(), 1);
        assert_eq!(d.row.data["A"], CellValue::Bool(true));
    }

    #[test]
    fn test_full_record_with_identifiers() {
        let d = decode(
            "Record from worksheet Servers, row 5: schema_id is s1. import_batch_id is b1. Server is SVR01. Environment is Production.",
        );
        assert_eq!(d.row.metadata.source.as_deref(), Some("Servers"));
        assert_eq!(d.row.metadata.row, Some(5));
        assert_eq!(d.row.metadata.schema_id.as_deref(), Some("s1"));
        assert_eq!(d.row.metadata.import_batch_id.as_deref(), Some("b1"));
        assert_eq!(d.row.data.len(), 2);
        assert_eq!(d.row.data["Server"], s("SVR01"));
        assert_eq!(d.row.data["Environment"], s("Production"));
    }

    #[test]
    fn test_source_name_with_commas() {
        let d = decode("Record from worksheet Sales, Q1, row 3: A is 1.");
        assert_eq!(d.row.metadata.source.as_deref(), Some("Sales, Q1"));
        assert_eq!(d.row.metadata.row, Some(3));
    }

    #[test]
    fn test_value_containing_is_splits_on_first() {
        let d = decode("Record from worksheet S, row 2: Note is this is fine.");
        assert_eq!(d.row.data["Note"], s("this is fine"));
    }

    #[test]
    fn test_only_last_fragment_strips_one_period() {
        let d = decode("Record from worksheet S, row 2: Version is 1.2. Tag is v1..");
        assert_eq!(d.row.data["Version"], CellValue::Number(1.2));
        assert_eq!(d.row.data["Tag"], s("v1."));
    }

    #[test]
    fn test_null_literal_and_lowercase_null() {
        let d = decode("Record from worksheet S, row 2: A is NULL. B is null.");
        assert_eq!(d.row.data["A"], CellValue::Null);
        assert_eq!(d.row.data["B"], s("null"));
    }

    #[test]
    fn test_continuation_fragment_appends_to_previous_value() {
        let d =
            decode("Record from worksheet S, row 2: Notes is Rebooted. Works now. Owner is ops.");
        assert_eq!(d.row.data["Notes"], s("Rebooted. Works now"));
        assert_eq!(d.row.data["Owner"], s("ops"));
    }

    #[test]
    fn test_empty_sentence_inside_value_round_trips() {
        for value in ["a. . b", "a. ", ". b"] {
            let row = vec![
                ("Notes".to_string(), s(value)),
                ("Owner".to_string(), s(value)),
            ];
            let text = encode_row(
                &row,
                &EncodeContext {
                    source_name: "S",
                    row_number: 2,
                    schema_id: None,
                    import_batch_id: None,
                },
            );
            let d = decode(&text);
            assert_eq!(d.row.data["Notes"], s(value), "text {:?}", text);
            assert_eq!(d.row.data["Owner"], s(value), "text {:?}", text);
        }
    }

    #[test]
    fn test_leading_fragment_without_is_skipped() {
        let d = decode("Record from worksheet S, row 2: garbage. A is 1.");
        assert_eq!(d.row.data.len(), 1);
        assert_eq!(d.diagnostics.len(), 1);
        assert_eq!(d.diagnostics[0].kind, DiagnosticKind::MalformedInput);
    }

    #[test]
    fn test_concatenated_records_truncated() {
        let d = decode(
            "Record from worksheet S, row 2: A is 1. Record from worksheet S, row 3: A is 2.",
        );
        assert_eq!(d.row.metadata.row, Some(2));
        assert_eq!(d.row.data["A"], CellValue::Number(1.0));
        assert!(d
            .diagnostics
            .iter()
            .any(|x| x.kind == DiagnosticKind::DecodeAmbiguity));
    }

    #[test]
    fn test_no_prefix_goes_to_content_key() {
        let d = decode("just some free text");
        assert_eq!(d.row.data["content"], s("just some free text"));
        assert_eq!(d.row.metadata.row, None);
    }

    #[test]
    fn test_custom_default_key() {
        let parser = SentenceParser::new("body", HeaderNormalizer::default());
        let d = parser.decode("hello", None, &DecodeContext::default());
        assert_eq!(d.row.data["body"], s("hello"));
    }

    #[test]
    fn test_empty_value() {
        let d = decode("Record from worksheet S, row 2: A is . B is x.");
        assert_eq!(d.row.data["A"], s(""));
        assert_eq!(d.row.data["B"], s("x"));
    }

    #[test]
    fn test_side_channel_takes_precedence() {
        let parser = SentenceParser::default();
        let d = parser.decode(
            "Record from worksheet S, row 2: schema_id is x. Port is 1.",
            Some(r#"[["Port #","8080"],["Owner",""]]"#),
            &DecodeContext::default(),
        );
        assert_eq!(d.row.metadata.schema_id.as_deref(), Some("x"));
        assert_eq!(d.row.data["Port"], CellValue::Number(8080.0));
        assert_eq!(d.row.data["Owner"], CellValue::Null);
    }

    #[test]
    fn test_invalid_side_channel_falls_back() {
        let parser = SentenceParser::default();
        let d = parser.decode(
            "Record from worksheet S, row 2: Port is 1.",
            Some("{not json"),
            &DecodeContext::default(),
        );
        assert_eq!(d.row.data["Port"], CellValue::Number(1.0));
        assert_eq!(d.diagnostics[0].kind, DiagnosticKind::MalformedInput);
    }

    fn schema() -> SchemaRecord {
        let col = |name: &str, data_type| ColumnDescriptor {
            name: name.into(),
            normalized_name: name.into(),
            data_type,
            is_required: true,
            common_values: vec![],
        };
        SchemaRecord {
            id: "s".into(),
            dataset_name: "d".into(),
            source_file: "f".into(),
            import_date: Utc::now(),
            import_batch_id: "b".into(),
            columns: vec![col("Code", DataType::String), col("Installed", DataType::Date)],
            metadata: schema_metadata(),
        }
    }

    #[test]
    fn test_schema_keeps_string_columns_verbatim() {
        let schema = schema();
        let ctx = DecodeContext {
            schema: Some(&schema),
            index: Some("rows"),
        };
        let d = SentenceParser::default().decode(
            "Record from worksheet S, row 2: Code is 007. Installed is 2024-01-15. Other is 007.",
            None,
            &ctx,
        );
        assert_eq!(d.row.data["Code"], s("007"));
        assert_eq!(
            d.row.data["Installed"],
            CellValue::Date(
                NaiveDate::from_ymd_opt(2024, 1, 15)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            )
        );
        assert_eq!(d.row.data["Other"], CellValue::Number(7.0));
        assert_eq!(d.row.metadata.index.as_deref(), Some("rows"));
    }

    #[test]
    fn test_encode_then_decode_preserves_fields() {
        let row = vec![
            ("Server".to_string(), s("SVR01")),
            ("Port".to_string(), CellValue::Number(8080.0)),
            ("Active".to_string(), CellValue::Bool(false)),
            ("Owner".to_string(), CellValue::Null),
        ];
        let text = encode_row(
            &row,
            &EncodeContext {
                source_name: "Servers",
                row_number: 7,
                schema_id: Some("sid"),
                import_batch_id: Some("bid"),
            },
        );
        let d = decode(&text);
        for (k, v) in &row {
            assert_eq!(&d.row.data[k], v, "field {}", k);
        }
        assert_eq!(d.row.metadata.row, Some(7));
        assert_eq!(d.row.metadata.schema_id.as_deref(), Some("sid"));
    }
}
