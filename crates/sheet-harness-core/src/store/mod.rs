//! Storage abstraction for Sheet Harness.
//!
//! Two traits split the storage surface the way the pipeline uses it:
//! [`RowStore`] holds encoded rows (and optional vectors) and answers
//! predicate queries; [`SchemaStore`] holds dataset schemas for the
//! registry. Backends usually implement both.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{RowChunk, SchemaRecord};
use crate::predicate::Predicate;

/// Row persistence and retrieval.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`persist`](RowStore::persist) | Store one encoded row, with its vector if any |
/// | [`run_query`](RowStore::run_query) | Rows of an index matching a predicate, in insertion order |
/// | [`count_rows`](RowStore::count_rows) | Number of rows stored in an index |
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn persist(&self, index: &str, chunk: &RowChunk, vector: Option<&[f32]>) -> Result<()>;

    /// At most `limit` rows of `index` matching `predicate`.
    async fn run_query(
        &self,
        index: &str,
        predicate: &Predicate,
        limit: usize,
    ) -> Result<Vec<RowChunk>>;

    async fn count_rows(&self, index: &str) -> Result<u64>;
}

/// Schema persistence used by [`SchemaRegistry`](crate::registry::SchemaRegistry).
#[async_trait]
pub trait SchemaStore: Send + Sync {
    async fn put_schema(&self, index: &str, schema: &SchemaRecord) -> Result<()>;

    /// Every schema stored for a dataset, in storage order.
    async fn schemas_for_dataset(&self, dataset_name: &str) -> Result<Vec<SchemaRecord>>;

    /// Every schema, in storage order.
    async fn all_schemas(&self) -> Result<Vec<SchemaRecord>>;
}
