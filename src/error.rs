//! Error types for store operations

use thiserror::Error;

/// Everything that can go wrong inside the store.
///
/// Decoding never shows up here: malformed payload bodies degrade to their raw
/// string instead. Missing references are `None`/empty results, not errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Cycle detected in chain at {at}")]
    ChainCycle { at: String },

    #[error("Poisoned lock")]
    Poisoned,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
