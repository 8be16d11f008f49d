//! Schema-aware predicate building and in-memory evaluation.
//!
//! A [`FilterSpec`] becomes a [`Predicate`]: an AND of clauses, one per
//! filter key, each an OR over that key's values. How a value compares is
//! decided per condition:
//!
//! | Value / field | Match |
//! |---------------|-------|
//! | contains `%` or `_` | LIKE with the value as written |
//! | string data field, fuzzy on, long enough | configured fuzzy operator |
//! | tag | case-insensitive exact |
//! | anything else | exact (case-insensitive if configured) |
//!
//! A data field is a string field when the dataset schema says so, when
//! the column is unknown, or when there is no schema at all.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::filter::{normalize_filter_key, FieldRef, FilterSpec};
use crate::models::{ChunkMetadata, DataType, DecodedRow, SchemaRecord};
use crate::value::CellValue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuzzyOperator {
    /// `LIKE '%value%'`.
    Like,
    /// Substring containment.
    #[default]
    Contains,
}

/// Fuzzy matching options for string data fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzyMatchConfig {
    pub enabled: bool,
    pub operator: FuzzyOperator,
    pub case_insensitive: bool,
    /// Values shorter than this (in characters) match exactly.
    pub min_length: usize,
}

impl Default for FuzzyMatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            operator: FuzzyOperator::Contains,
            case_insensitive: true,
            min_length: 3,
        }
    }
}

impl FuzzyMatchConfig {
    /// Exact, case-sensitive matching for data fields.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            operator: FuzzyOperator::Contains,
            case_insensitive: false,
            min_length: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    CaseInsensitiveExact,
    FuzzyContains,
    /// SQL LIKE: `%` any run, `_` any single character.
    FuzzyLike,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Condition {
    pub field: FieldRef,
    pub kind: MatchKind,
    pub value: String,
    /// Applies to the fuzzy kinds; exact kinds carry it in the kind itself.
    pub case_insensitive: bool,
}

impl Condition {
    pub fn matches(&self, actual: Option<&str>) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        match self.kind {
            MatchKind::Exact => actual == self.value,
            MatchKind::CaseInsensitiveExact => actual.to_lowercase() == self.value.to_lowercase(),
            MatchKind::FuzzyContains => {
                if self.case_insensitive {
                    actual.to_lowercase().contains(&self.value.to_lowercase())
                } else {
                    actual.contains(&self.value)
                }
            }
            MatchKind::FuzzyLike => like_matches(&self.value, actual, self.case_insensitive),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.kind {
            MatchKind::Exact => "==",
            MatchKind::CaseInsensitiveExact => "~=",
            MatchKind::FuzzyContains => "CONTAINS",
            MatchKind::FuzzyLike => "LIKE",
        };
        write!(f, "{} {} {:?}", self.field, op, self.value)?;
        if self.case_insensitive
            && matches!(self.kind, MatchKind::FuzzyContains | MatchKind::FuzzyLike)
        {
            f.write_str(" (ci)")?;
        }
        Ok(())
    }
}

/// OR over conditions on one field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Clause {
    pub any_of: Vec<Condition>,
}

/// AND over clauses. An empty predicate matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Predicate {
    pub all_of: Vec<Clause>,
}

/// Resolves a field reference to its comparable text.
pub trait FieldLookup {
    fn lookup(&self, field: &FieldRef) -> Option<String>;
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.all_of.is_empty()
    }

    pub fn matches<L: FieldLookup + ?Sized>(&self, record: &L) -> bool {
        self.all_of.iter().all(|clause| {
            clause
                .any_of
                .iter()
                .any(|c| c.matches(record.lookup(&c.field).as_deref()))
        })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all_of.is_empty() {
            return f.write_str("(all rows)");
        }
        let clauses: Vec<String> = self
            .all_of
            .iter()
            .map(|clause| {
                let parts: Vec<String> = clause.any_of.iter().map(|c| c.to_string()).collect();
                format!("({})", parts.join(" OR "))
            })
            .collect();
        f.write_str(&clauses.join(" AND "))
    }
}

/// A stored row as seen by a predicate: tags plus decoded fields.
pub struct RowView<'a> {
    pub metadata: &'a ChunkMetadata,
    pub row: &'a DecodedRow,
}

impl FieldLookup for RowView<'_> {
    fn lookup(&self, field: &FieldRef) -> Option<String> {
        match field {
            FieldRef::Tag(name) => self.metadata.tag(name),
            FieldRef::Data(name) => match self.row.get(name) {
                Some(CellValue::Null) | None => None,
                Some(value) => Some(value.render()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterWarning {
    /// Data field not present in the dataset schema. The clause is kept.
    UnknownField { field: String, dataset: String },
    /// Key with no values. The key is ignored.
    EmptyValues { field: String },
}

impl FilterWarning {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            FilterWarning::UnknownField { field, dataset } => Diagnostic::warning(
                DiagnosticKind::UnknownFilterField,
                format!("filter field {} is not a column of dataset {}", field, dataset),
            )
            .with_field("field", field)
            .with_field("dataset", dataset),
            FilterWarning::EmptyValues { field } => Diagnostic::warning(
                DiagnosticKind::MalformedInput,
                format!("filter key {} has no values; ignored", field),
            )
            .with_field("field", field),
        }
    }
}

impl fmt::Display for FilterWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterWarning::UnknownField { field, dataset } => {
                write!(f, "unknown filter field {} for dataset {}", field, dataset)
            }
            FilterWarning::EmptyValues { field } => {
                write!(f, "filter key {} has no values", field)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPredicate {
    pub predicate: Predicate,
    pub warnings: Vec<FilterWarning>,
}

pub fn has_wildcard(value: &str) -> bool {
    value.contains('%') || value.contains('_')
}

/// Turn a filter spec into a predicate, consulting `schema` for column
/// types and canonical column names.
pub fn build_predicate(
    spec: &FilterSpec,
    fuzzy: &FuzzyMatchConfig,
    schema: Option<&SchemaRecord>,
) -> BuiltPredicate {
    let mut warnings = Vec::new();
    let mut all_of = Vec::with_capacity(spec.len());

    for (raw_key, values) in spec.entries() {
        let mut field = normalize_filter_key(raw_key);
        let mut column_type = None;

        if let (FieldRef::Data(name), Some(schema)) = (&field, schema) {
            match schema.column(name) {
                Some(column) => {
                    column_type = Some(column.data_type);
                    field = FieldRef::Data(column.normalized_name.clone());
                }
                None => {
                    warn!(
                        field = %field,
                        dataset = %schema.dataset_name,
                        "filter field not in schema"
                    );
                    warnings.push(FilterWarning::UnknownField {
                        field: field.path(),
                        dataset: schema.dataset_name.clone(),
                    });
                }
            }
        }

        if values.is_empty() {
            warnings.push(FilterWarning::EmptyValues {
                field: field.path(),
            });
            continue;
        }

        let any_of = values
            .iter()
            .map(|v| build_condition(&field, column_type, v, fuzzy))
            .collect();
        all_of.push(Clause { any_of });
    }

    BuiltPredicate {
        predicate: Predicate { all_of },
        warnings,
    }
}

fn build_condition(
    field: &FieldRef,
    column_type: Option<DataType>,
    value: &str,
    fuzzy: &FuzzyMatchConfig,
) -> Condition {
    let case_insensitive = match field {
        FieldRef::Tag(_) => true,
        FieldRef::Data(_) => fuzzy.case_insensitive,
    };
    let condition = |kind, value: String| Condition {
        field: field.clone(),
        kind,
        value,
        case_insensitive,
    };

    if has_wildcard(value) {
        return condition(MatchKind::FuzzyLike, value.to_string());
    }

    let is_string_data =
        field.is_data() && column_type.map_or(true, |t| t == DataType::String);
    if fuzzy.enabled && is_string_data && value.chars().count() >= fuzzy.min_length {
        return match fuzzy.operator {
            FuzzyOperator::Like => condition(MatchKind::FuzzyLike, format!("%{}%", value)),
            FuzzyOperator::Contains => condition(MatchKind::FuzzyContains, value.to_string()),
        };
    }

    let kind = if case_insensitive {
        MatchKind::CaseInsensitiveExact
    } else {
        MatchKind::Exact
    };
    condition(kind, value.to_string())
}

/// SQL LIKE semantics without an escape character.
pub fn like_matches(pattern: &str, text: &str, case_insensitive: bool) -> bool {
    let fold = |s: &str| -> Vec<char> {
        if case_insensitive {
            s.to_lowercase().chars().collect()
        } else {
            s.chars().collect()
        }
    };
    let p = fold(pattern);
    let t = fold(text);

    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '%' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if pi < p.len() && (p[pi] == '_' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}
