//! # Sheet Harness
//!
//! Tabular row ingestion and schema-aware filtered retrieval on top of a
//! document store.
//!
//! Sheets are read row by row, their column types inferred, and every row
//! stored as a self-describing sentence tagged with the id of the schema
//! it was imported under. Queries are key/value filters that the dataset
//! schema turns into typed predicates; matching sentences are decoded back
//! into structured rows.
//!
//! ```text
//! import: sheet file → SheetTable → schema draft → SchemaRecord
//!                                 → row sentences → SQLite (+ vectors)
//! query:  filters → predicate (typed by schema) → SQL → row sentences
//!                 → decoded rows
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`sheet_reader`] | CSV, TSV and XLSX readers |
//! | [`connector_sheets`] | Import path discovery |
//! | [`ingest`] | `shx import` |
//! | [`query`] | `shx query` |
//! | [`schemas`] | `shx schemas` / `shx schema` |
//! | [`decode`] | `shx decode` |
//! | [`sqlite_store`] | SQLite row and schema store |
//! | [`embedding`] | Embedding providers |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod connector_sheets;
pub mod db;
pub mod decode;
pub mod embedding;
pub mod ingest;
pub mod migrate;
pub mod progress;
pub mod query;
pub mod schemas;
pub mod sheet_reader;
pub mod sqlite_store;
