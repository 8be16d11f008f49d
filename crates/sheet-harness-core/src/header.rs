//! Column header normalization.
//!
//! Raw spreadsheet headers ("Server Name", "Port #", "") become
//! identifier-safe keys ("Server_Name", "Port", "Column3"). The same rule
//! is reused for `data.` filter keys, so a filter written against the
//! original header text still lands on the stored column.

use std::collections::HashSet;

use crate::error::{Error, Result};

/// Prefix used for placeholder names of blank headers.
pub const DEFAULT_PLACEHOLDER_PREFIX: &str = "Column";

/// Turns raw headers into unique, identifier-safe column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderNormalizer {
    prefix: String,
}

impl Default for HeaderNormalizer {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PLACEHOLDER_PREFIX.to_string(),
        }
    }
}

impl HeaderNormalizer {
    /// Build a normalizer with a custom placeholder prefix.
    ///
    /// The prefix must itself survive normalization unchanged, otherwise
    /// placeholder names would not be stable under re-normalization.
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() || sanitize_identifier(&prefix) != prefix {
            return Err(Error::InvalidOptions(format!(
                "header placeholder prefix '{}' must be a non-empty identifier ([A-Za-z0-9_], no leading, trailing or repeated underscores)",
                prefix
            )));
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Normalize one header. `column_index` is zero-based and only used
    /// for the placeholder of a blank header.
    pub fn normalize(&self, raw: &str, column_index: usize) -> String {
        let cleaned = sanitize_identifier(raw);
        if cleaned.is_empty() {
            format!("{}{}", self.prefix, column_index + 1)
        } else {
            cleaned
        }
    }

    /// Normalize a whole header row, suffixing `_2`, `_3`, ... so that
    /// names are unique under case-insensitive comparison.
    pub fn normalize_all<S: AsRef<str>>(&self, headers: &[S]) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::with_capacity(headers.len());
        let mut names = Vec::with_capacity(headers.len());

        for (idx, raw) in headers.iter().enumerate() {
            let base = self.normalize(raw.as_ref(), idx);
            let mut candidate = base.clone();
            let mut suffix = 2;
            while seen.contains(&candidate.to_ascii_lowercase()) {
                candidate = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            seen.insert(candidate.to_ascii_lowercase());
            names.push(candidate);
        }

        names
    }
}

/// Replace every character outside `[A-Za-z0-9_]` with `_`, collapse runs
/// of `_`, and trim them from both ends. May return an empty string.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_underscore = false;

    for c in raw.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '_' {
            c
        } else {
            '_'
        };
        if c == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        out.push(c);
    }

    out.trim_matches('_').to_string()
}
