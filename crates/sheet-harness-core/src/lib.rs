//! # Sheet Harness Core
//!
//! Pure logic for Sheet Harness: typed cell values, header normalization,
//! schema inference, the row text protocol (encoder and sentence parser),
//! the schema registry, and schema-aware filter predicates.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Storage and embedding are reached through
//! the [`store`] and [`embedding`] traits, which the `sheet-harness` app
//! crate implements against SQLite and remote providers.

pub mod diagnostics;
pub mod embedding;
pub mod encode;
pub mod error;
pub mod filter;
pub mod header;
pub mod infer;
pub mod ingest;
pub mod models;
pub mod parse;
pub mod predicate;
pub mod query;
pub mod registry;
pub mod store;
pub mod value;
