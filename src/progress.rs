//! Import progress reporting.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event for `shx import`.
#[derive(Clone, Debug)]
pub enum ImportProgressEvent {
    /// Walking the import path; no total yet.
    Discovering { root: String },
    /// Reading file `n` of `total`.
    Importing { file: String, n: u64, total: u64 },
    /// Rows written so far for the current table.
    Rows { table: String, rows: u64 },
}

pub trait ImportProgressReporter: Send + Sync {
    fn report(&self, event: ImportProgressEvent);
}

/// Human-friendly progress: `import servers.csv  2 / 14 files`.
pub struct StderrProgress;

impl ImportProgressReporter for StderrProgress {
    fn report(&self, event: ImportProgressEvent) {
        let line = match &event {
            ImportProgressEvent::Discovering { root } => {
                format!("import {}  discovering...\n", root)
            }
            ImportProgressEvent::Importing { file, n, total } => format!(
                "import {}  {} / {} files\n",
                file,
                format_number(*n),
                format_number(*total)
            ),
            ImportProgressEvent::Rows { table, rows } => {
                format!("import {}  {} rows\n", table, format_number(*rows))
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// One JSON object per line.
pub struct JsonProgress;

impl ImportProgressReporter for JsonProgress {
    fn report(&self, event: ImportProgressEvent) {
        let obj = match &event {
            ImportProgressEvent::Discovering { root } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "root": root,
            }),
            ImportProgressEvent::Importing { file, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "importing",
                "file": file,
                "n": n,
                "total": total,
            }),
            ImportProgressEvent::Rows { table, rows } => serde_json::json!({
                "event": "progress",
                "phase": "rows",
                "table": table,
                "rows": rows,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl ImportProgressReporter for NoProgress {
    fn report(&self, _event: ImportProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!(
                "Unknown progress mode '{}': expected off, human or json",
                other
            ),
        }
    }

    pub fn reporter(&self) -> Box<dyn ImportProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
