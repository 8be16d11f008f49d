//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/shx.sqlite"
//!
//! [ingest]
//! index = "rows"
//! sample_window = 100
//!
//! [filter]
//! fuzzy_enabled = true
//! operator = "contains"
//!
//! [connectors.sheets]
//! root = "./sheets"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use sheet_harness_core::header::{HeaderNormalizer, DEFAULT_PLACEHOLDER_PREFIX};
use sheet_harness_core::infer::{SchemaInferrer, DEFAULT_SAMPLE_WINDOW, MAX_COMMON_VALUES};
use sheet_harness_core::parse::{SentenceParser, DEFAULT_CONTENT_KEY};
use sheet_harness_core::predicate::{FuzzyMatchConfig, FuzzyOperator};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Target index for rows and schemas.
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default = "default_sample_window")]
    pub sample_window: usize,
    #[serde(default = "default_max_common_values")]
    pub max_common_values: usize,
    #[serde(default = "default_header_prefix")]
    pub header_prefix: String,
    /// Key that holds decoded text lacking a record prefix.
    #[serde(default = "default_content_key")]
    pub content_key: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            index: default_index(),
            sample_window: default_sample_window(),
            max_common_values: default_max_common_values(),
            header_prefix: default_header_prefix(),
            content_key: default_content_key(),
        }
    }
}

fn default_index() -> String {
    "rows".to_string()
}
fn default_sample_window() -> usize {
    DEFAULT_SAMPLE_WINDOW
}
fn default_max_common_values() -> usize {
    MAX_COMMON_VALUES
}
fn default_header_prefix() -> String {
    DEFAULT_PLACEHOLDER_PREFIX.to_string()
}
fn default_content_key() -> String {
    DEFAULT_CONTENT_KEY.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    #[serde(default = "default_true")]
    pub fuzzy_enabled: bool,
    #[serde(default)]
    pub operator: FuzzyOperator,
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
    #[serde(default = "default_min_length")]
    pub min_length: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            fuzzy_enabled: true,
            operator: FuzzyOperator::default(),
            case_insensitive: true,
            min_length: default_min_length(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_min_length() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            final_limit: default_final_limit(),
        }
    }
}

fn default_final_limit() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub sheets: Option<SheetsConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SheetsConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for SheetsConnectorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.csv".to_string(),
        "**/*.tsv".to_string(),
        "**/*.xlsx".to_string(),
    ]
}

impl Config {
    pub fn fuzzy(&self) -> FuzzyMatchConfig {
        FuzzyMatchConfig {
            enabled: self.filter.fuzzy_enabled,
            operator: self.filter.operator,
            case_insensitive: self.filter.case_insensitive,
            min_length: self.filter.min_length,
        }
    }

    pub fn normalizer(&self) -> Result<HeaderNormalizer> {
        Ok(HeaderNormalizer::new(self.ingest.header_prefix.clone())?)
    }

    pub fn inferrer(&self) -> Result<SchemaInferrer> {
        Ok(SchemaInferrer::new(
            self.ingest.sample_window,
            self.ingest.max_common_values,
            self.normalizer()?,
        )?)
    }

    pub fn parser(&self) -> Result<SentenceParser> {
        Ok(SentenceParser::new(
            self.ingest.content_key.clone(),
            self.normalizer()?,
        ))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.ingest.index.trim().is_empty() {
        anyhow::bail!("ingest.index must not be empty");
    }
    if config.ingest.sample_window == 0 {
        anyhow::bail!("ingest.sample_window must be > 0");
    }
    // Validates the header prefix.
    config.normalizer()?;

    if config.ingest.content_key.trim().is_empty() {
        anyhow::bail!("ingest.content_key must not be empty");
    }

    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
