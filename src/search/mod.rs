//! Retrieval core
//!
//! Embedding containers and `.npz` archives, query encoders with model
//! fallback (ONNX Runtime or built-in), exhaustive cosine ranking, weighted
//! fusion, and the engine that ties them to the catalog.

pub mod embedding;
pub mod encoder;
pub mod engine;
pub mod fusion;
pub mod npz;
pub mod onnx;
pub mod ranker;
pub mod store;
pub mod vision;

pub use encoder::{ImageEncoder, QueryVector, TextEncoder};
pub use engine::{RetrievalEngine, SearchMode, SearchRequest};
pub use fusion::{fuse, FusionWeights};
pub use npz::{import_npz, read_npz};
pub use ranker::{rank, RankedResult};
pub use store::{ContainerWriter, EmbeddingMatrix, EmbeddingSet, Modality};
