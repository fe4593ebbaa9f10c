//! product-finder library
//!
//! Multi-modal catalog retrieval over precomputed embeddings.
//!
//! # Modules
//!
//! - `core`: Catalog table, configuration, logging setup
//! - `search`: Embedding containers, query encoders, ranking, fusion and the engine
//! - `error`: Error taxonomy shared by every module

pub mod core;
pub mod error;
pub mod search;

// Re-exports for convenience
pub use core::catalog::{CatalogRecord, CatalogStore};
pub use core::config::{resolve_models_dir, RetrievalConfig};
pub use error::{Result, RetrievalError};
pub use search::engine::{EngineStatus, ResolvedResult, RetrievalEngine, SearchMode, SearchRequest};
pub use search::fusion::FusionWeights;
pub use search::ranker::RankedResult;
