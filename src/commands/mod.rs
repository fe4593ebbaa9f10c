pub mod import;
pub mod product;
pub mod search;
pub mod status;

use anyhow::{Context, Result};
use std::path::Path;

use product_finder::{resolve_models_dir, RetrievalConfig, RetrievalEngine};

/// Resolve the models directory, read its config and load the engine
pub fn open_engine(models_dir: Option<&Path>) -> Result<(RetrievalConfig, RetrievalEngine)> {
    let models_dir = resolve_models_dir(models_dir);
    let config = RetrievalConfig::load(&models_dir)?;
    let engine = RetrievalEngine::open(&config)
        .with_context(|| format!("Failed to load catalog data from {}", models_dir.display()))?;
    Ok((config, engine))
}
