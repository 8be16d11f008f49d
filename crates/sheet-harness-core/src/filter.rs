//! Filter keys and filter specifications.
//!
//! A filter is an ordered mapping from key to one or more values. Keys
//! starting with `data.` (any case) address row fields; every other key
//! addresses a tag in the chunk metadata (`dataset_name`, `row_number`,
//! `source_name`, ...).

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::header::sanitize_identifier;

pub const DATA_PREFIX: &str = "data.";

/// A normalized filter target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", content = "name", rename_all = "lowercase")]
pub enum FieldRef {
    /// Metadata tag, always lowercase.
    Tag(String),
    /// Row field, normalized like a column header.
    Data(String),
}

impl FieldRef {
    pub fn name(&self) -> &str {
        match self {
            FieldRef::Tag(n) | FieldRef::Data(n) => n,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, FieldRef::Data(_))
    }

    /// Key text that normalizes back to this field.
    pub fn path(&self) -> String {
        match self {
            FieldRef::Tag(n) => n.clone(),
            FieldRef::Data(n) => format!("{}{}", DATA_PREFIX, n),
        }
    }

    /// Lowercase form used when comparing field references.
    pub fn canonical(&self) -> String {
        self.path().to_ascii_lowercase()
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Normalize a raw filter key.
///
/// The `data.` prefix is matched case-insensitively; the remainder goes
/// through the header normalization rule. Tags are lowercased. A key that
/// normalizes to nothing keeps its trimmed text so it can still be
/// reported as unknown.
pub fn normalize_filter_key(raw: &str) -> FieldRef {
    let trimmed = raw.trim();
    let (is_data, rest) = match trimmed.get(..DATA_PREFIX.len()) {
        Some(p) if p.eq_ignore_ascii_case(DATA_PREFIX) => (true, &trimmed[DATA_PREFIX.len()..]),
        _ => (false, trimmed),
    };

    let normalized = sanitize_identifier(rest);
    let name = if normalized.is_empty() {
        rest.trim().to_string()
    } else {
        normalized
    };

    if is_data {
        FieldRef::Data(name)
    } else {
        FieldRef::Tag(name.to_ascii_lowercase())
    }
}

/// Ordered filter mapping: key to one or more accepted values.
///
/// Deserializes from a JSON object whose values are a scalar or an array
/// of scalars, keeping key order:
///
/// ```json
/// {"data.Environment": "Production", "dataset_name": ["servers", "hosts"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    entries: Vec<(String, Vec<String>)>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one value, merging with an existing identical key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// Builder form of [`insert`](Self::insert) for several values.
    pub fn with<I, V>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => existing.extend(values),
            None => self.entries.push((key.to_string(), values)),
        }
        self
    }

    /// Parse a `key=value` assignment as given on the command line.
    pub fn push_assignment(&mut self, assignment: &str) -> Result<()> {
        let (key, value) = assignment.split_once('=').ok_or_else(|| {
            Error::InvalidFilter(format!("expected KEY=VALUE, got '{}'", assignment))
        })?;
        if key.trim().is_empty() {
            return Err(Error::InvalidFilter(format!(
                "empty key in '{}'",
                assignment
            )));
        }
        self.insert(key.trim(), value);
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidFilter(e.to_string()))
    }

    pub fn entries(&self) -> &[(String, Vec<String>)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// First key whose normalized form matches `field`.
    pub fn values_for(&self, field: &FieldRef) -> Option<&[String]> {
        let wanted = field.canonical();
        self.entries
            .iter()
            .find(|(k, _)| normalize_filter_key(k).canonical() == wanted)
            .map(|(_, v)| v.as_slice())
    }
}

fn scalar_to_string(value: serde_json::Value) -> std::result::Result<String, String> {
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("unsupported filter value {}", other)),
    }
}

struct FilterSpecVisitor;

impl<'de> Visitor<'de> for FilterSpecVisitor {
    type Value = FilterSpec;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of filter keys to a value or a list of values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<FilterSpec, A::Error> {
        let mut spec = FilterSpec::new();
        while let Some(key) = map.next_key::<String>()? {
            let raw: serde_json::Value = map.next_value()?;
            let values = match raw {
                serde_json::Value::Array(items) => items
                    .into_iter()
                    .map(scalar_to_string)
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(de::Error::custom)?,
                other => vec![scalar_to_string(other).map_err(de::Error::custom)?],
            };
            spec = spec.with(&key, values);
        }
        Ok(spec)
    }
}

impl<'de> Deserialize<'de> for FilterSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(FilterSpecVisitor)
    }
}
