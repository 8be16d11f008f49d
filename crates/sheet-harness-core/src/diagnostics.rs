//! Structured diagnostics.
//!
//! Recoverable problems (a malformed cell, a failed schema write, an
//! unknown filter field) never abort an import or a query. They are
//! reported as [`Diagnostic`] values through a [`DiagnosticSink`], which
//! the app routes into `tracing` and which tests collect for assertions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A cell, fragment, or side channel that could not be read as expected.
    MalformedInput,
    /// The schema store rejected a write; the import continued without a schema.
    SchemaPersistenceFailure,
    /// A `data.` filter key with no matching column in the dataset schema.
    UnknownFilterField,
    /// Concatenated or prefix-like row text that had to be cut or skipped.
    DecodeAmbiguity,
    /// The embedder failed; rows were stored without vectors.
    EmbeddingFailure,
    /// A source file could not be opened or parsed at all.
    SourceUnreadable,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::MalformedInput => "malformed_input",
            DiagnosticKind::SchemaPersistenceFailure => "schema_persistence_failure",
            DiagnosticKind::UnknownFilterField => "unknown_filter_field",
            DiagnosticKind::DecodeAmbiguity => "decode_ambiguity",
            DiagnosticKind::EmbeddingFailure => "embedding_failure",
            DiagnosticKind::SourceUnreadable => "source_unreadable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl Diagnostic {
    pub fn new(severity: Severity, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn info(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, kind, message)
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, kind, message)
    }

    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, kind, message)
    }

    pub fn with_field(mut self, key: &str, value: impl ToString) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }

    /// `key=value` pairs joined by spaces, for log lines.
    pub fn fields_display(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)?;
        if !self.fields.is_empty() {
            write!(f, " ({})", self.fields_display())?;
        }
        Ok(())
    }
}

/// Receiver for diagnostics.
///
/// Implementations must be `Send + Sync`; they are shared by reference
/// across the async import and query pipelines.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);

    fn emit_all(&self, diagnostics: Vec<Diagnostic>) {
        for d in diagnostics {
            self.emit(d);
        }
    }
}

/// Forwards every diagnostic to `tracing` at the matching level.
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, d: Diagnostic) {
        let fields = d.fields_display();
        match d.severity {
            Severity::Info => {
                tracing::info!(kind = d.kind.as_str(), fields = %fields, "{}", d.message)
            }
            Severity::Warning => {
                tracing::warn!(kind = d.kind.as_str(), fields = %fields, "{}", d.message)
            }
            Severity::Error => {
                tracing::error!(kind = d.kind.as_str(), fields = %fields, "{}", d.message)
            }
        }
    }
}

/// Drops everything.
pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn emit(&self, _diagnostic: Diagnostic) {}
}

/// Keeps every diagnostic in memory, optionally forwarding each one to
/// another sink as it arrives.
pub struct CollectingSink {
    collected: Mutex<Vec<Diagnostic>>,
    forward: Option<Box<dyn DiagnosticSink>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self {
            collected: Mutex::new(Vec::new()),
            forward: None,
        }
    }

    pub fn tee(forward: Box<dyn DiagnosticSink>) -> Self {
        Self {
            collected: Mutex::new(Vec::new()),
            forward: Some(forward),
        }
    }

    /// Copy of everything collected so far.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        match self.collected.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.snapshot().iter().filter(|d| d.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CollectingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        if let Some(forward) = &self.forward {
            forward.emit(diagnostic.clone());
        }
        match self.collected.lock() {
            Ok(mut guard) => guard.push(diagnostic),
            Err(poisoned) => poisoned.into_inner().push(diagnostic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_fields() {
        let d = Diagnostic::warning(DiagnosticKind::MalformedInput, "bad cell")
            .with_field("row", 4)
            .with_field("column", "Port");
        assert_eq!(
            d.to_string(),
            "[malformed_input] bad cell (column=Port row=4)"
        );
    }

    #[test]
    fn test_collecting_sink_counts_by_kind() {
        let sink = CollectingSink::new();
        sink.emit(Diagnostic::warning(DiagnosticKind::MalformedInput, "a"));
        sink.emit_all(vec![
            Diagnostic::warning(DiagnosticKind::DecodeAmbiguity, "b"),
            Diagnostic::warning(DiagnosticKind::MalformedInput, "c"),
        ]);
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.count(DiagnosticKind::MalformedInput), 2);
    }

    #[test]
    fn test_tee_forwards() {
        let sink = CollectingSink::tee(Box::new(NoopSink));
        sink.emit(Diagnostic::info(DiagnosticKind::EmbeddingFailure, "x"));
        assert!(!sink.is_empty());
    }
}
