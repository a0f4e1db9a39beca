//! Error types for the genstream crate.

use thiserror::Error;

/// Top-level error type for generation operations.
#[derive(Error, Debug)]
pub enum GenError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cache has {got} layers, model expects {expected}")]
    LayerCount { expected: usize, got: usize },

    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("model evaluation failed: {0}")]
    Eval(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("decode worker disconnected")]
    WorkerDisconnected,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GenError>;
