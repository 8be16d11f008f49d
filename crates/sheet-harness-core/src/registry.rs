//! Dataset schema registry.
//!
//! Every call to [`SchemaRegistry::store_schema`] mints a fresh schema id,
//! a fresh import batch id and the current UTC import date, so re-importing
//! the same file produces a new, independently addressable schema. The
//! latest schema for a dataset is the one with the greatest import date.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::models::{schema_metadata, SchemaDraft, SchemaRecord};
use crate::store::SchemaStore;

/// Outcome of a non-fatal schema registration.
#[derive(Debug, Clone)]
pub struct Registration {
    /// `None` when the store rejected the write.
    pub schema: Option<SchemaRecord>,
    /// Minted even when persistence fails, so rows of this import can
    /// still be grouped.
    pub import_batch_id: String,
}

impl Registration {
    pub fn schema_id(&self) -> Option<&str> {
        self.schema.as_ref().map(|s| s.id.as_str())
    }
}

pub struct SchemaRegistry<'a, S: SchemaStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: SchemaStore + ?Sized> SchemaRegistry<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    fn mint(draft: &SchemaDraft) -> SchemaRecord {
        SchemaRecord {
            id: Uuid::new_v4().to_string(),
            dataset_name: draft.dataset_name.clone(),
            source_file: draft.source_file.clone(),
            import_date: Utc::now(),
            import_batch_id: Uuid::new_v4().to_string(),
            columns: draft.columns.clone(),
            metadata: schema_metadata(),
        }
    }

    /// Persist a new schema version for `draft.dataset_name`.
    pub async fn store_schema(
        &self,
        draft: &SchemaDraft,
        target_index: &str,
    ) -> Result<SchemaRecord> {
        let record = Self::mint(draft);
        self.store
            .put_schema(target_index, &record)
            .await
            .with_context(|| format!("storing schema for dataset {}", draft.dataset_name))?;
        debug!(
            dataset = %record.dataset_name,
            schema_id = %record.id,
            columns = record.columns.len(),
            "schema stored"
        );
        Ok(record)
    }

    /// Like [`store_schema`](Self::store_schema), but a store failure is
    /// reported to `sink` as [`DiagnosticKind::SchemaPersistenceFailure`]
    /// and the import continues without a schema id.
    pub async fn try_store_schema(
        &self,
        draft: &SchemaDraft,
        target_index: &str,
        sink: &dyn DiagnosticSink,
    ) -> Registration {
        let record = Self::mint(draft);
        match self.store.put_schema(target_index, &record).await {
            Ok(()) => Registration {
                import_batch_id: record.import_batch_id.clone(),
                schema: Some(record),
            },
            Err(e) => {
                sink.emit(
                    Diagnostic::error(
                        DiagnosticKind::SchemaPersistenceFailure,
                        format!("could not store schema: {:#}", e),
                    )
                    .with_field("dataset", &draft.dataset_name)
                    .with_field("index", target_index),
                );
                Registration {
                    schema: None,
                    import_batch_id: record.import_batch_id,
                }
            }
        }
    }

    /// Latest schema for a dataset.
    pub async fn get_schema(&self, dataset_name: &str) -> Result<Option<SchemaRecord>> {
        let schemas = self.store.schemas_for_dataset(dataset_name).await?;
        // max_by keeps the last of equal elements, i.e. the later write
        Ok(schemas.into_iter().max_by_key(|s| s.import_date))
    }

    /// All schema versions, oldest first.
    pub async fn list_schemas(&self) -> Result<Vec<SchemaRecord>> {
        let mut schemas = self.store.all_schemas().await?;
        schemas.sort_by_key(|s| s.import_date);
        Ok(schemas)
    }
}
