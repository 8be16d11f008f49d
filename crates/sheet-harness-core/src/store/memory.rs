//! In-memory [`RowStore`] and [`SchemaStore`] for tests and embedding.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. Queries evaluate the predicate
//! against the chunk tags and its structured data mirror; chunks stored
//! without a mirror are decoded from their sentence (side channel first).

use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{DecodedRow, RowChunk, SchemaRecord};
use crate::parse::{DecodeContext, SentenceParser};
use crate::predicate::{Predicate, RowView};

use super::{RowStore, SchemaStore};

struct StoredRow {
    index: String,
    chunk: RowChunk,
    vector: Option<Vec<f32>>,
}

/// In-memory store for tests.
pub struct InMemoryStore {
    rows: RwLock<Vec<StoredRow>>,
    schemas: RwLock<Vec<(String, SchemaRecord)>>,
    parser: SentenceParser,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_parser(SentenceParser::default())
    }

    pub fn with_parser(parser: SentenceParser) -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            schemas: RwLock::new(Vec::new()),
            parser,
        }
    }

    /// Number of stored vectors in an index.
    pub fn vector_count(&self, index: &str) -> Result<usize> {
        let rows = self.rows.read().map_err(|_| anyhow!("row store lock poisoned"))?;
        Ok(rows
            .iter()
            .filter(|r| r.index == index && r.vector.is_some())
            .count())
    }

    /// Every chunk in an index, in insertion order.
    pub fn chunks(&self, index: &str) -> Result<Vec<RowChunk>> {
        let rows = self.rows.read().map_err(|_| anyhow!("row store lock poisoned"))?;
        Ok(rows
            .iter()
            .filter(|r| r.index == index)
            .map(|r| r.chunk.clone())
            .collect())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RowStore for InMemoryStore {
    async fn persist(&self, index: &str, chunk: &RowChunk, vector: Option<&[f32]>) -> Result<()> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| anyhow!("row store lock poisoned"))?;
        rows.push(StoredRow {
            index: index.to_string(),
            chunk: chunk.clone(),
            vector: vector.map(|v| v.to_vec()),
        });
        Ok(())
    }

    async fn run_query(
        &self,
        index: &str,
        predicate: &Predicate,
        limit: usize,
    ) -> Result<Vec<RowChunk>> {
        let rows = self.rows.read().map_err(|_| anyhow!("row store lock poisoned"))?;
        let ctx = DecodeContext {
            schema: None,
            index: Some(index),
        };

        let mut out = Vec::new();
        for stored in rows.iter().filter(|r| r.index == index) {
            if out.len() >= limit {
                break;
            }
            let row = if stored.chunk.data.is_empty() {
                self.parser
                    .decode(&stored.chunk.text, stored.chunk.raw_json.as_deref(), &ctx)
                    .row
            } else {
                DecodedRow {
                    data: stored.chunk.data.clone(),
                    ..Default::default()
                }
            };
            let view = RowView {
                metadata: &stored.chunk.metadata,
                row: &row,
            };
            if predicate.matches(&view) {
                out.push(stored.chunk.clone());
            }
        }
        Ok(out)
    }

    async fn count_rows(&self, index: &str) -> Result<u64> {
        let rows = self.rows.read().map_err(|_| anyhow!("row store lock poisoned"))?;
        Ok(rows.iter().filter(|r| r.index == index).count() as u64)
    }
}

#[async_trait]
impl SchemaStore for InMemoryStore {
    async fn put_schema(&self, index: &str, schema: &SchemaRecord) -> Result<()> {
        let mut schemas = self
            .schemas
            .write()
            .map_err(|_| anyhow!("schema store lock poisoned"))?;
        schemas.push((index.to_string(), schema.clone()));
        Ok(())
    }

    async fn schemas_for_dataset(&self, dataset_name: &str) -> Result<Vec<SchemaRecord>> {
        let schemas = self
            .schemas
            .read()
            .map_err(|_| anyhow!("schema store lock poisoned"))?;
        Ok(schemas
            .iter()
            .filter(|(_, s)| s.dataset_name == dataset_name)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn all_schemas(&self) -> Result<Vec<SchemaRecord>> {
        let schemas = self
            .schemas
            .read()
            .map_err(|_| anyhow!("schema store lock poisoned"))?;
        Ok(schemas.iter().map(|(_, s)| s.clone()).collect())
    }
}
