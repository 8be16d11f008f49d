//! Typed errors for the pure parts of the core crate.
//!
//! Operations that talk to collaborators (stores, embedders) return
//! `anyhow::Result` like the rest of the harness; the variants here cover
//! caller mistakes that can be detected without any I/O.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Invalid filter specification: {0}")]
    InvalidFilter(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
