//! Error types for engine construction, row logs and checkpoints.
//!
//! Only recoverable conditions are errors. Structural invariant violations
//! in the inference state (mismatched assignment widths, an out-of-order
//! removal) are bugs and panic instead.

use std::io;

use crate::engine::ConfigError;

/// Errors returned by the public engine API.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: String },

    #[error("schema mismatch: {0}")]
    Schema(String),

    #[error("invalid row log: {0}")]
    RowLog(String),

    #[error("invalid checkpoint: {0}")]
    Checkpoint(String),

    #[error("{0} rows were added without assignments; kind-structure search needs every row tracked")]
    UntrackedRows(usize),
}
