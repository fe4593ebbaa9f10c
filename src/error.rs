//! Error taxonomy for the retrieval core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Catalog or embedding source missing, unreadable or corrupt
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// No encoder could be initialized for a modality
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Dimension mismatch: query has {actual} dimensions, matrix expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Blank text or absent image for a mode that requires it
    #[error("Empty query: {0}")]
    EmptyQuery(String),

    #[error("Index {index} out of range for catalog of {len} products")]
    IndexOutOfRange { index: usize, len: usize },

    /// The selected model failed while encoding a query
    #[error("Encoding failed with model '{model}': {reason}")]
    EncodeFailed { model: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),
}

impl RetrievalError {
    pub(crate) fn data(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        RetrievalError::DataUnavailable(format!("{context}: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
