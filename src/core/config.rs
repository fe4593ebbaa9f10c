//! Retrieval configuration and models directory resolution

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, RetrievalError};
use crate::search::fusion::FusionWeights;

/// Models directory mounted in container deployments
pub const CONTAINER_MODELS_DIR: &str = "/app/models";

/// Optional override file looked up inside the models directory
pub const CONFIG_FILE_NAME: &str = "retrieval.yaml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    #[serde(skip)]
    pub models_dir: PathBuf,
    pub catalog_file: String,
    /// `.npz` archive or SQLite container with the image matrices
    pub visual_container: String,
    /// `.npz` archive or SQLite container with the text matrices
    pub textual_container: String,
    /// Text model candidates, tried in order
    pub text_models: Vec<String>,
    /// Visual model candidates, tried in order
    pub visual_models: Vec<String>,
    pub image_variants: Vec<String>,
    /// Preferred text variant first
    pub text_variants: Vec<String>,
    pub default_top_k: usize,
    pub weights: FusionWeights,
    /// Return a zero vector instead of an error when text encoding fails
    pub degraded_text_fallback: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            catalog_file: "df_clean_indexed.csv".to_string(),
            visual_container: "embeddings_visuels.npz".to_string(),
            textual_container: "embeddings_textuels.npz".to_string(),
            text_models: vec![
                "all-mpnet-base-v2".to_string(),
                "paraphrase-MiniLM-L6-v2".to_string(),
                "all-MiniLM-L6-v2".to_string(),
            ],
            visual_models: vec!["ViT-B/32".to_string()],
            image_variants: vec!["clip_embeddings".to_string()],
            text_variants: vec![
                "title_embeddings_improved".to_string(),
                "title_embeddings_basic".to_string(),
            ],
            default_top_k: 10,
            weights: FusionWeights::default(),
            degraded_text_fallback: false,
        }
    }
}

impl RetrievalConfig {
    /// Defaults rooted at `models_dir`, overridden by `retrieval.yaml` when present
    pub fn load(models_dir: &Path) -> Result<Self> {
        let config_path = models_dir.join(CONFIG_FILE_NAME);

        let mut config = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path).map_err(|e| {
                RetrievalError::Config(format!("{}: {}", config_path.display(), e))
            })?;
            tracing::info!(path = %config_path.display(), "loaded retrieval config");
            serde_yaml::from_str::<RetrievalConfig>(&raw).map_err(|e| {
                RetrievalError::Config(format!("{}: {}", config_path.display(), e))
            })?
        } else {
            RetrievalConfig::default()
        };

        config.models_dir = models_dir.to_path_buf();
        Ok(config)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.models_dir.join(&self.catalog_file)
    }

    pub fn visual_container_path(&self) -> PathBuf {
        self.models_dir.join(&self.visual_container)
    }

    pub fn textual_container_path(&self) -> PathBuf {
        self.models_dir.join(&self.textual_container)
    }
}

/// Resolve the models directory: explicit path (`--models-dir` or
/// `MODELS_DIR`), then the container mount, then `./models`
pub fn resolve_models_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }

    let container = Path::new(CONTAINER_MODELS_DIR);
    if container.exists() {
        return container.to_path_buf();
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("models")
}
