//! Retrieval engine - ties catalog, embeddings and encoders together
//!
//! The engine is the explicit context object of the system: it is built once
//! with [`RetrievalEngine::open`], owns every loaded store and model, and is
//! shared by reference (or `Arc`) with whatever serves requests. Dropping it
//! releases everything; there is no global state.

use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::Serialize;
use std::time::Instant;

use super::encoder::{image_providers, text_providers, ImageEncoder, TextEncoder};
use super::fusion::{fuse, FusionWeights};
use super::ranker::{rank, RankedResult};
use super::store::{EmbeddingMatrix, EmbeddingSet, Modality};
use crate::core::catalog::{CatalogRecord, CatalogStore};
use crate::core::config::RetrievalConfig;
use crate::error::{Result, RetrievalError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Image,
    Text,
    Combined,
}

/// A caller-supplied query and mode
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub mode: SearchMode,
    pub image: Option<DynamicImage>,
    pub text: Option<String>,
    pub weights: FusionWeights,
    pub top_k: usize,
}

/// Ranked result joined to its catalog record
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedResult {
    pub rank: usize,
    pub score: f32,
    pub record: CatalogRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantInfo {
    pub modality: Modality,
    pub variant: String,
    pub dimension: usize,
    pub rows: usize,
}

/// Summary of what the engine loaded
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub products: usize,
    pub variants: Vec<VariantInfo>,
    pub image_model: String,
    pub image_variant: String,
    pub text_model: String,
    pub text_variant: String,
    pub degraded_text_fallback: bool,
    pub loaded_at: DateTime<Utc>,
}

pub struct RetrievalEngine {
    catalog: CatalogStore,
    image_embeddings: EmbeddingSet,
    text_embeddings: EmbeddingSet,
    image_variant: String,
    text_variant: String,
    image_encoder: ImageEncoder,
    text_encoder: TextEncoder,
    loaded_at: DateTime<Utc>,
}

impl RetrievalEngine {
    /// Load everything named by `config`. Any missing data or model aborts.
    pub fn open(config: &RetrievalConfig) -> Result<Self> {
        let start = Instant::now();

        let catalog = CatalogStore::load(&config.catalog_path())?;
        let image_embeddings = EmbeddingSet::open(&config.visual_container_path(), Modality::Image)?;
        let text_embeddings = EmbeddingSet::open(&config.textual_container_path(), Modality::Text)?;

        let image_encoder =
            ImageEncoder::initialize(&image_providers(&config.visual_models, &config.models_dir))?;
        let text_encoder = TextEncoder::initialize(
            &text_providers(&config.text_models, &config.models_dir),
            config.degraded_text_fallback,
        )?;

        let engine = Self::assemble(
            catalog,
            image_embeddings,
            text_embeddings,
            &config.image_variants,
            &config.text_variants,
            image_encoder,
            text_encoder,
        )?;

        tracing::info!(
            products = engine.catalog.len(),
            image_variant = %engine.image_variant,
            text_variant = %engine.text_variant,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "retrieval engine ready"
        );
        Ok(engine)
    }

    /// Build an engine from already-loaded parts, selecting variants and
    /// checking that every selected matrix lines up with the catalog.
    pub fn assemble(
        catalog: CatalogStore,
        image_embeddings: EmbeddingSet,
        text_embeddings: EmbeddingSet,
        image_variants: &[String],
        text_variants: &[String],
        image_encoder: ImageEncoder,
        text_encoder: TextEncoder,
    ) -> Result<Self> {
        check_modality(&image_embeddings, Modality::Image)?;
        check_modality(&text_embeddings, Modality::Text)?;

        let image_variant = image_embeddings.select(image_variants)?;
        let text_variant = text_embeddings.select(text_variants)?;
        check_alignment(&catalog, image_variant)?;
        check_alignment(&catalog, text_variant)?;

        if text_variant.dimension != text_encoder.dimension() {
            tracing::warn!(
                variant = %text_variant.variant,
                variant_dim = text_variant.dimension,
                model = text_encoder.model_name(),
                model_dim = text_encoder.dimension(),
                "text model does not match the text embeddings; text queries will fail"
            );
        }
        if image_variant.dimension != image_encoder.dimension() {
            tracing::warn!(
                variant = %image_variant.variant,
                variant_dim = image_variant.dimension,
                model = image_encoder.model_name(),
                model_dim = image_encoder.dimension(),
                "visual model does not match the image embeddings; image queries will fail"
            );
        }

        let image_variant = image_variant.variant.clone();
        let text_variant = text_variant.variant.clone();

        Ok(Self {
            catalog,
            image_embeddings,
            text_embeddings,
            image_variant,
            text_variant,
            image_encoder,
            text_encoder,
            loaded_at: Utc::now(),
        })
    }

    fn image_matrix(&self) -> Result<&EmbeddingMatrix> {
        self.image_embeddings.select(std::slice::from_ref(&self.image_variant))
    }

    fn text_matrix(&self) -> Result<&EmbeddingMatrix> {
        self.text_embeddings.select(std::slice::from_ref(&self.text_variant))
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    /// Products most visually similar to `image`
    pub fn search_by_image(&self, image: &DynamicImage, top_k: usize) -> Result<Vec<RankedResult>> {
        let start = Instant::now();
        let query = self.image_encoder.encode(image)?;
        let results = rank(&query, self.image_matrix()?, top_k)?;
        tracing::debug!(top_k, hits = results.len(), elapsed_ms = start.elapsed().as_millis() as u64, "image search");
        Ok(results)
    }

    /// Products whose titles are most similar to `text`
    pub fn search_by_text(&self, text: &str, top_k: usize) -> Result<Vec<RankedResult>> {
        let start = Instant::now();
        let query = self.text_encoder.encode(text)?;
        let results = rank(&query, self.text_matrix()?, top_k)?;
        tracing::debug!(top_k, hits = results.len(), elapsed_ms = start.elapsed().as_millis() as u64, "text search");
        Ok(results)
    }

    /// Rank both modalities over the whole catalog, fuse, keep `top_k`
    pub fn combined_search(
        &self,
        image: &DynamicImage,
        text: &str,
        weights: FusionWeights,
        top_k: usize,
    ) -> Result<Vec<RankedResult>> {
        let all = self.catalog.len();
        let image_ranking = self.search_by_image(image, all)?;
        let text_ranking = self.search_by_text(text, all)?;
        Ok(fuse(&image_ranking, &text_ranking, weights, top_k))
    }

    /// Dispatch a request on its mode
    pub fn execute(&self, request: &SearchRequest) -> Result<Vec<RankedResult>> {
        let image = || {
            request
                .image
                .as_ref()
                .ok_or_else(|| RetrievalError::EmptyQuery("an image is required".to_string()))
        };
        let text = || {
            request
                .text
                .as_deref()
                .ok_or_else(|| RetrievalError::EmptyQuery("a text description is required".to_string()))
        };

        match request.mode {
            SearchMode::Image => self.search_by_image(image()?, request.top_k),
            SearchMode::Text => self.search_by_text(text()?, request.top_k),
            SearchMode::Combined => {
                self.combined_search(image()?, text()?, request.weights, request.top_k)
            }
        }
    }

    /// Catalog record at `index`, or `None` past the end
    pub fn product_info(&self, index: usize) -> Option<&CatalogRecord> {
        self.catalog.get(index).ok()
    }

    /// Join results to catalog records; an index with no row gets a placeholder
    pub fn resolve(&self, results: &[RankedResult]) -> Vec<ResolvedResult> {
        results
            .iter()
            .enumerate()
            .map(|(i, result)| ResolvedResult {
                rank: i + 1,
                score: result.score,
                record: self
                    .product_info(result.index)
                    .cloned()
                    .unwrap_or_else(|| {
                        tracing::warn!(index = result.index, "ranked index has no catalog row");
                        CatalogRecord::placeholder(result.index)
                    }),
            })
            .collect()
    }

    pub fn status(&self) -> EngineStatus {
        let variants = self
            .image_embeddings
            .matrices()
            .iter()
            .chain(self.text_embeddings.matrices())
            .map(|m| VariantInfo {
                modality: m.modality,
                variant: m.variant.clone(),
                dimension: m.dimension,
                rows: m.rows(),
            })
            .collect();

        EngineStatus {
            products: self.catalog.len(),
            variants,
            image_model: self.image_encoder.model_name().to_string(),
            image_variant: self.image_variant.clone(),
            text_model: self.text_encoder.model_name().to_string(),
            text_variant: self.text_variant.clone(),
            degraded_text_fallback: self.text_encoder.degraded_fallback(),
            loaded_at: self.loaded_at,
        }
    }
}

fn check_modality(set: &EmbeddingSet, expected: Modality) -> Result<()> {
    if set.modality() != expected {
        return Err(RetrievalError::DataUnavailable(format!(
            "expected a {expected} container, found {}",
            set.modality()
        )));
    }
    Ok(())
}

fn check_alignment(catalog: &CatalogStore, matrix: &EmbeddingMatrix) -> Result<()> {
    if matrix.rows() != catalog.len() {
        return Err(RetrievalError::DataUnavailable(format!(
            "{} has {} rows but the catalog has {} products",
            matrix.variant,
            matrix.rows(),
            catalog.len()
        )));
    }
    Ok(())
}
