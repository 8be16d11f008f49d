//! SQLite-backed [`RowStore`] and [`SchemaStore`].
//!
//! Predicates are compiled to SQL over two JSON columns: tags live in
//! `metadata_json`, row fields in `data_json` (rendered text, `null` for
//! absent values). Tags are read as `CAST(json_extract(metadata_json, ?) AS TEXT)`
//! with the JSON path bound as a parameter. Row field names keep their case
//! but match ignoring ASCII case, so a field is looked up through
//! `json_each(data_json)` with the name bound as a parameter.
//!
//! | Match | SQL |
//! |-------|-----|
//! | exact | `x = ?` |
//! | case-insensitive exact | `LOWER(x) = LOWER(?)` |
//! | contains | `instr(x, ?) > 0` (both sides lowered when case-insensitive) |
//! | LIKE, case-insensitive | `x LIKE ?` |
//! | LIKE, case-sensitive | `x GLOB ?` with the pattern translated |

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use sheet_harness_core::embedding::{blob_to_vec, vec_to_blob};
use sheet_harness_core::filter::FieldRef;
use sheet_harness_core::models::{ChunkMetadata, RowChunk, SchemaRecord};
use sheet_harness_core::predicate::{Condition, MatchKind, Predicate};
use sheet_harness_core::store::{RowStore, SchemaStore};
use sheet_harness_core::value::CellValue;

pub struct SqliteStore {
    pool: SqlitePool,
    model: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            model: "unknown".to_string(),
        }
    }

    /// Record `model` alongside stored vectors.
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Length of a vector already stored for `model`, if there is one.
    pub async fn stored_dims(&self, model: &str) -> Result<Option<usize>> {
        let blob: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT embedding FROM row_vectors WHERE model = ? LIMIT 1")
                .bind(model)
                .fetch_optional(&self.pool)
                .await?;
        Ok(blob.map(|b| blob_to_vec(&b).len()))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// A compiled `WHERE` fragment and its bind values, in order.
#[derive(Debug, Default, PartialEq)]
pub struct SqlFilter {
    pub sql: String,
    pub binds: Vec<String>,
}

fn json_path(name: &str) -> String {
    format!("$.\"{}\"", name.replace('"', "\\\""))
}

const TAG_EXPR: &str = "CAST(json_extract(metadata_json, ?) AS TEXT)";
const DATA_EXPR: &str = "(SELECT CAST(value AS TEXT) FROM json_each(row_chunks.data_json) \
     WHERE LOWER(key) = LOWER(?) LIMIT 1)";

/// SQL expression for a field plus the parameter that locates it.
fn field_expr(field: &FieldRef) -> (&'static str, String) {
    match field {
        FieldRef::Tag(name) => (TAG_EXPR, json_path(name)),
        FieldRef::Data(name) => (DATA_EXPR, name.clone()),
    }
}

/// Translate a LIKE pattern into a GLOB pattern with the same meaning.
pub fn like_to_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '%' => out.push('*'),
            '_' => out.push('?'),
            '*' => out.push_str("[*]"),
            '?' => out.push_str("[?]"),
            '[' => out.push_str("[[]"),
            other => out.push(other),
        }
    }
    out
}

fn condition_sql(c: &Condition, binds: &mut Vec<String>) -> String {
    let (expr, locator) = field_expr(&c.field);
    binds.push(locator);
    let sql = match c.kind {
        MatchKind::Exact => format!("{} = ?", expr),
        MatchKind::CaseInsensitiveExact => format!("LOWER({}) = LOWER(?)", expr),
        MatchKind::FuzzyContains if c.case_insensitive => {
            format!("instr(LOWER({}), LOWER(?)) > 0", expr)
        }
        MatchKind::FuzzyContains => format!("instr({}, ?) > 0", expr),
        MatchKind::FuzzyLike if c.case_insensitive => format!("{} LIKE ?", expr),
        MatchKind::FuzzyLike => format!("{} GLOB ?", expr),
    };
    let value = match c.kind {
        MatchKind::FuzzyLike if !c.case_insensitive => like_to_glob(&c.value),
        _ => c.value.clone(),
    };
    binds.push(value);
    sql
}

/// Compile a predicate. An empty predicate compiles to `1 = 1`.
pub fn predicate_to_sql(predicate: &Predicate) -> SqlFilter {
    if predicate.is_empty() {
        return SqlFilter {
            sql: "1 = 1".to_string(),
            binds: Vec::new(),
        };
    }
    let mut binds = Vec::new();
    let clauses: Vec<String> = predicate
        .all_of
        .iter()
        .map(|clause| {
            let parts: Vec<String> = clause
                .any_of
                .iter()
                .map(|c| condition_sql(c, &mut binds))
                .collect();
            format!("({})", parts.join(" OR "))
        })
        .collect();
    SqlFilter {
        sql: clauses.join(" AND "),
        binds,
    }
}

fn data_to_json(data: &BTreeMap<String, CellValue>) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = data
        .iter()
        .map(|(k, v)| {
            let rendered = match v {
                CellValue::Null => serde_json::Value::Null,
                other => serde_json::Value::String(other.render()),
            };
            (k.clone(), rendered)
        })
        .collect();
    serde_json::Value::Object(map)
}

fn data_from_json(json: &str) -> BTreeMap<String, CellValue> {
    match serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(json) {
        Ok(map) => map
            .into_iter()
            .map(|(k, v)| (k, CellValue::from_json(&v)))
            .collect(),
        Err(_) => BTreeMap::new(),
    }
}

#[async_trait]
impl RowStore for SqliteStore {
    async fn persist(&self, index: &str, chunk: &RowChunk, vector: Option<&[f32]>) -> Result<()> {
        let metadata_json = serde_json::to_string(&chunk.metadata)?;
        let data_json = data_to_json(&chunk.data).to_string();
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO row_chunks (id, index_name, seq, text, metadata_json, data_json, raw_json, hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(index)
        .bind(chunk.seq as i64)
        .bind(&chunk.text)
        .bind(&metadata_json)
        .bind(&data_json)
        .bind(&chunk.raw_json)
        .bind(&chunk.hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if let Some(vec) = vector {
            sqlx::query(
                "INSERT INTO row_vectors (chunk_id, model, dims, embedding, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&self.model)
            .bind(vec.len() as i64)
            .bind(vec_to_blob(vec))
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn run_query(
        &self,
        index: &str,
        predicate: &Predicate,
        limit: usize,
    ) -> Result<Vec<RowChunk>> {
        let filter = predicate_to_sql(predicate);
        let sql = format!(
            "SELECT id, seq, text, metadata_json, data_json, raw_json, hash FROM row_chunks \
             WHERE index_name = ? AND ({}) ORDER BY rowid LIMIT ?",
            filter.sql
        );

        let mut query = sqlx::query(&sql).bind(index);
        for value in &filter.binds {
            query = query.bind(value);
        }
        let rows = query
            .bind(limit.min(i64::MAX as usize) as i64)
            .fetch_all(&self.pool)
            .await
            .context("running row query")?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata_json: String = row.get("metadata_json");
            let metadata: ChunkMetadata =
                serde_json::from_str(&metadata_json).with_context(|| {
                    format!("corrupt metadata for row {}", row.get::<String, _>("id"))
                })?;
            let data_json: String = row.get("data_json");
            let seq: i64 = row.get("seq");
            chunks.push(RowChunk {
                id: row.get("id"),
                seq: seq.max(0) as u64,
                text: row.get("text"),
                metadata,
                data: data_from_json(&data_json),
                raw_json: row.get("raw_json"),
                hash: row.get("hash"),
            });
        }
        Ok(chunks)
    }

    async fn count_rows(&self, index: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM row_chunks WHERE index_name = ?")
            .bind(index)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

fn records_from_rows(rows: Vec<String>) -> Result<Vec<SchemaRecord>> {
    rows.iter()
        .map(|json| serde_json::from_str(json).context("corrupt schema record"))
        .collect()
}

#[async_trait]
impl SchemaStore for SqliteStore {
    async fn put_schema(&self, index: &str, schema: &SchemaRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schemas (id, index_name, dataset_name, import_date, import_batch_id, record_json)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&schema.id)
        .bind(index)
        .bind(&schema.dataset_name)
        .bind(schema.import_date.to_rfc3339())
        .bind(&schema.import_batch_id)
        .bind(serde_json::to_string(schema)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn schemas_for_dataset(&self, dataset_name: &str) -> Result<Vec<SchemaRecord>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT record_json FROM schemas WHERE dataset_name = ? ORDER BY rowid",
        )
        .bind(dataset_name)
        .fetch_all(&self.pool)
        .await?;
        records_from_rows(rows)
    }

    async fn all_schemas(&self) -> Result<Vec<SchemaRecord>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT record_json FROM schemas ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        records_from_rows(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheet_harness_core::filter::FilterSpec;
    use sheet_harness_core::predicate::{build_predicate, FuzzyMatchConfig};
    use sheet_harness_core::store::memory::InMemoryStore;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::create_tables(&pool).await.unwrap();
        pool
    }

    fn chunk_with(id: &str, data: &[(&str, CellValue)]) -> RowChunk {
        RowChunk {
            id: id.to_string(),
            seq: 0,
            text: String::new(),
            metadata: ChunkMetadata {
                source_name: "servers.csv".to_string(),
                row_number: 2,
                dataset_name: "servers".to_string(),
                schema_id: None,
                import_batch_id: None,
                document_type: "row".to_string(),
            },
            data: data.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            raw_json: None,
            hash: "h".to_string(),
        }
    }

    #[test]
    fn test_like_to_glob() {
        assert_eq!(like_to_glob("%SVR_1%"), "*SVR?1*");
        assert_eq!(like_to_glob("a*b?[c]"), "a[*]b[?][[]c]");
    }

    #[test]
    fn test_empty_predicate_matches_all() {
        let f = predicate_to_sql(&Predicate::default());
        assert_eq!(f.sql, "1 = 1");
        assert!(f.binds.is_empty());
    }

    #[test]
    fn test_predicate_compiles_with_binds_in_order() {
        let spec = FilterSpec::new()
            .with("data.env", ["Production"])
            .with("project", ["a", "b"]);
        let built = build_predicate(&spec, &FuzzyMatchConfig::disabled(), None);
        let f = predicate_to_sql(&built.predicate);
        assert_eq!(
            f.sql,
            format!(
                "({DATA_EXPR} = ?) AND \
                 (LOWER({TAG_EXPR}) = LOWER(?) OR LOWER({TAG_EXPR}) = LOWER(?))"
            )
        );
        assert_eq!(
            f.binds,
            vec!["env", "Production", "$.\"project\"", "a", "$.\"project\"", "b"]
        );
    }

    #[test]
    fn test_case_sensitive_like_uses_glob() {
        let spec = FilterSpec::new().with("data.name", ["SVR_%"]);
        let built = build_predicate(&spec, &FuzzyMatchConfig::disabled(), None);
        let f = predicate_to_sql(&built.predicate);
        assert_eq!(f.sql, format!("({DATA_EXPR} GLOB ?)"));
        assert_eq!(f.binds[1], "SVR?*");
    }

    #[test]
    fn test_data_json_renders_values() {
        let mut data = BTreeMap::new();
        data.insert("Port".to_string(), CellValue::Number(8080.0));
        data.insert("Owner".to_string(), CellValue::Null);
        let json = data_to_json(&data);
        assert_eq!(json, serde_json::json!({"Port": "8080", "Owner": null}));
        let back = data_from_json(&json.to_string());
        assert_eq!(back["Port"], CellValue::Number(8080.0));
        assert_eq!(back["Owner"], CellValue::Null);
    }

    #[tokio::test]
    async fn test_data_field_name_ignores_case_like_memory_store() {
        let sqlite = SqliteStore::new(memory_pool().await);
        let memory = InMemoryStore::new();
        let chunk = chunk_with("r1", &[("Environment", CellValue::String("Production".into()))]);
        sqlite.persist("rows", &chunk, None).await.unwrap();
        memory.persist("rows", &chunk, None).await.unwrap();

        for key in ["data.environment", "data.ENVIRONMENT", "data.Environment"] {
            let spec = FilterSpec::new().with(key, ["Production"]);
            let built = build_predicate(&spec, &FuzzyMatchConfig::disabled(), None);
            let from_sqlite = sqlite.run_query("rows", &built.predicate, 10).await.unwrap();
            let from_memory = memory.run_query("rows", &built.predicate, 10).await.unwrap();
            assert_eq!(from_sqlite.len(), 1, "{}", key);
            assert_eq!(from_sqlite.len(), from_memory.len(), "{}", key);
        }

        let spec = FilterSpec::new().with("data.environment", ["Staging"]);
        let built = build_predicate(&spec, &FuzzyMatchConfig::disabled(), None);
        assert!(sqlite.run_query("rows", &built.predicate, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_null_data_field_never_matches() {
        let sqlite = SqliteStore::new(memory_pool().await);
        let chunk = chunk_with("r1", &[("Owner", CellValue::Null)]);
        sqlite.persist("rows", &chunk, None).await.unwrap();

        let spec = FilterSpec::new().with("data.owner", ["%"]);
        let built = build_predicate(&spec, &FuzzyMatchConfig::disabled(), None);
        assert!(sqlite.run_query("rows", &built.predicate, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stored_dims_reads_back_vector_length() {
        let sqlite = SqliteStore::new(memory_pool().await).with_model("m");
        assert_eq!(sqlite.stored_dims("m").await.unwrap(), None);

        let chunk = chunk_with("r1", &[]);
        let vector = [0.1f32, 0.2, 0.3];
        sqlite.persist("rows", &chunk, Some(&vector[..])).await.unwrap();
        assert_eq!(sqlite.stored_dims("m").await.unwrap(), Some(3));
        assert_eq!(sqlite.stored_dims("other").await.unwrap(), None);
    }
}
