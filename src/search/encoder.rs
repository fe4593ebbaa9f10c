//! Query encoders with ordered model fallback
//!
//! Each modality is configured with an ordered list of model providers.
//! At initialization the providers are tried in order and the first one
//! that loads becomes the encoder's model for the rest of its lifetime.
//! A loaded model is not assumed reentrant, so encode calls go through a
//! per-model mutex.

use image::DynamicImage;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;

use super::embedding::HtpModel;
use super::onnx::{sentence_model, ClipImageProvider, OnnxTextProvider, CLIP_VIT_B_32};
use super::store::Modality;
use super::vision::{normalize_image, GridStatsModel};
use crate::error::{Result, RetrievalError};

/// An encoded query, ready to be ranked
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryVector {
    pub modality: Modality,
    pub dimension: usize,
    pub values: Vec<f32>,
}

impl QueryVector {
    pub fn new(modality: Modality, values: Vec<f32>) -> Self {
        Self {
            modality,
            dimension: values.len(),
            values,
        }
    }
}

/// A loaded text model
pub trait TextModel: Send {
    fn dimension(&self) -> usize;
    fn embed(&mut self, text: &str) -> Result<Vec<f32>>;
}

/// A loaded visual model; each model applies its own preprocessing
pub trait ImageModel: Send {
    fn dimension(&self) -> usize;
    fn embed(&mut self, image: &DynamicImage) -> Result<Vec<f32>>;
}

/// One candidate in a fallback list
pub trait ModelProvider<M: ?Sized> {
    fn name(&self) -> &str;
    fn load(&self) -> Result<Box<M>>;
}

/// The provider that won selection, and where it sat in the list
pub struct SelectedModel<M: ?Sized> {
    pub name: String,
    pub position: usize,
    pub model: Box<M>,
}

/// Try providers in order, returning the first that loads
pub fn select_provider<M: ?Sized>(
    modality: Modality,
    providers: &[Box<dyn ModelProvider<M> + '_>],
) -> Result<SelectedModel<M>> {
    let mut failures = Vec::new();

    for (position, provider) in providers.iter().enumerate() {
        match provider.load() {
            Ok(model) => {
                tracing::info!(%modality, model = provider.name(), position, "model selected");
                return Ok(SelectedModel {
                    name: provider.name().to_string(),
                    position,
                    model,
                });
            }
            Err(e) => {
                tracing::warn!(%modality, model = provider.name(), error = %e, "model failed to load");
                failures.push(format!("{}: {}", provider.name(), e));
            }
        }
    }

    Err(RetrievalError::ModelUnavailable(if failures.is_empty() {
        format!("no {modality} model candidates configured")
    } else {
        format!("no {modality} model could be loaded ({})", failures.join("; "))
    }))
}

struct HtpTextModel(HtpModel);

impl TextModel for HtpTextModel {
    fn dimension(&self) -> usize {
        self.0.dimension()
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        Ok(self.0.embed(text))
    }
}

/// Built-in `htp-<dimension>` text models. They do not share a vector space
/// with sentence-transformer embeddings and are meant for tests or as an
/// explicitly configured last resort.
pub struct HtpProvider {
    name: String,
}

impl ModelProvider<dyn TextModel> for HtpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<Box<dyn TextModel>> {
        let model = self
            .name
            .strip_prefix("htp-")
            .and_then(|dim| dim.parse::<usize>().ok())
            .and_then(HtpModel::new)
            .ok_or_else(|| {
                RetrievalError::ModelUnavailable(format!("invalid HTP model name '{}'", self.name))
            })?;
        Ok(Box::new(HtpTextModel(model)))
    }
}

struct GridStatsImageModel(GridStatsModel);

impl ImageModel for GridStatsImageModel {
    fn dimension(&self) -> usize {
        self.0.dimension()
    }

    fn embed(&mut self, image: &DynamicImage) -> Result<Vec<f32>> {
        Ok(self.0.embed(&normalize_image(image)))
    }
}

/// Built-in `grid-stats-512` visual model; like HTP, only for tests or as
/// an explicitly configured last resort
pub struct GridStatsProvider;

impl ModelProvider<dyn ImageModel> for GridStatsProvider {
    fn name(&self) -> &str {
        "grid-stats-512"
    }

    fn load(&self) -> Result<Box<dyn ImageModel>> {
        Ok(Box::new(GridStatsImageModel(GridStatsModel::new())))
    }
}

/// Provider for a configured name that matches no built-in model
struct UnknownProvider {
    name: String,
}

impl<M: ?Sized> ModelProvider<M> for UnknownProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&self) -> Result<Box<M>> {
        Err(RetrievalError::ModelUnavailable(format!("unknown model '{}'", self.name)))
    }
}

/// Map configured text model names to providers. ONNX models load from
/// `models_dir`.
pub fn text_providers(names: &[String], models_dir: &Path) -> Vec<Box<dyn ModelProvider<dyn TextModel>>> {
    names
        .iter()
        .map(|name| -> Box<dyn ModelProvider<dyn TextModel>> {
            if let Some(checkpoint) = sentence_model(name) {
                Box::new(OnnxTextProvider::new(checkpoint, models_dir))
            } else if name.starts_with("htp-") {
                Box::new(HtpProvider { name: name.clone() })
            } else {
                Box::new(UnknownProvider { name: name.clone() })
            }
        })
        .collect()
}

/// Map configured visual model names to providers. ONNX models load from
/// `models_dir`.
pub fn image_providers(names: &[String], models_dir: &Path) -> Vec<Box<dyn ModelProvider<dyn ImageModel>>> {
    names
        .iter()
        .map(|name| -> Box<dyn ModelProvider<dyn ImageModel>> {
            match name.as_str() {
                CLIP_VIT_B_32 | "clip-vit-b-32" => Box::new(ClipImageProvider::new(models_dir)),
                "grid-stats-512" | "grid-stats" => Box::new(GridStatsProvider),
                _ => Box::new(UnknownProvider { name: name.clone() }),
            }
        })
        .collect()
}

/// Text query encoder
pub struct TextEncoder {
    name: String,
    dimension: usize,
    degraded_fallback: bool,
    model: Mutex<Box<dyn TextModel>>,
}

impl TextEncoder {
    /// Select the first loadable provider; `ModelUnavailable` when none loads
    pub fn initialize(
        providers: &[Box<dyn ModelProvider<dyn TextModel>>],
        degraded_fallback: bool,
    ) -> Result<Self> {
        let selected = select_provider(Modality::Text, providers)?;
        Ok(Self {
            name: selected.name,
            dimension: selected.model.dimension(),
            degraded_fallback,
            model: Mutex::new(selected.model),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn degraded_fallback(&self) -> bool {
        self.degraded_fallback
    }

    /// Encode `text`. A model failure is a typed error unless the degraded
    /// fallback is enabled, in which case a zero vector is returned.
    pub fn encode(&self, text: &str) -> Result<QueryVector> {
        if text.trim().is_empty() {
            return Err(RetrievalError::EmptyQuery("text query is blank".to_string()));
        }

        let outcome = self.model.lock().embed(text);
        let values = match outcome {
            Ok(values) if values.len() == self.dimension => values,
            Ok(values) => {
                self.encode_failure(format!(
                    "model returned {} values, expected {}",
                    values.len(),
                    self.dimension
                ))?
            }
            Err(e) => self.encode_failure(e.to_string())?,
        };

        Ok(QueryVector::new(Modality::Text, values))
    }

    fn encode_failure(&self, reason: String) -> Result<Vec<f32>> {
        if self.degraded_fallback {
            tracing::warn!(model = %self.name, %reason, "text encoding failed, using zero vector");
            Ok(vec![0.0; self.dimension])
        } else {
            Err(RetrievalError::EncodeFailed {
                model: self.name.clone(),
                reason,
            })
        }
    }
}

/// Image query encoder
pub struct ImageEncoder {
    name: String,
    dimension: usize,
    model: Mutex<Box<dyn ImageModel>>,
}

impl ImageEncoder {
    /// Select the first loadable provider; `ModelUnavailable` when none loads
    pub fn initialize(providers: &[Box<dyn ModelProvider<dyn ImageModel>>]) -> Result<Self> {
        let selected = select_provider(Modality::Image, providers)?;
        Ok(Self {
            name: selected.name,
            dimension: selected.model.dimension(),
            model: Mutex::new(selected.model),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn encode(&self, image: &DynamicImage) -> Result<QueryVector> {
        if image.width() == 0 || image.height() == 0 {
            return Err(RetrievalError::EmptyQuery("image has no pixels".to_string()));
        }

        let values = self.model.lock().embed(image).map_err(|e| RetrievalError::EncodeFailed {
            model: self.name.clone(),
            reason: e.to_string(),
        })?;

        if values.len() != self.dimension {
            return Err(RetrievalError::EncodeFailed {
                model: self.name.clone(),
                reason: format!("model returned {} values, expected {}", values.len(), self.dimension),
            });
        }

        Ok(QueryVector::new(Modality::Image, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records load attempts so ordering can be asserted
    struct Recording<'a> {
        name: &'static str,
        loads: bool,
        log: &'a RefCell<Vec<&'static str>>,
    }

    impl ModelProvider<dyn TextModel> for Recording<'_> {
        fn name(&self) -> &str {
            self.name
        }

        fn load(&self) -> Result<Box<dyn TextModel>> {
            self.log.borrow_mut().push(self.name);
            if self.loads {
                Ok(Box::new(HtpTextModel(HtpModel::new(8).unwrap())))
            } else {
                Err(RetrievalError::ModelUnavailable(format!("{} weights missing", self.name)))
            }
        }
    }

    struct Broken;

    impl TextModel for Broken {
        fn dimension(&self) -> usize {
            4
        }

        fn embed(&mut self, _text: &str) -> Result<Vec<f32>> {
            Err(RetrievalError::ModelUnavailable("inference session crashed".to_string()))
        }
    }

    struct BrokenProvider;

    impl ModelProvider<dyn TextModel> for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }

        fn load(&self) -> Result<Box<dyn TextModel>> {
            Ok(Box::new(Broken))
        }
    }

    #[test]
    fn test_candidates_tried_in_order_until_first_success() {
        let log = RefCell::new(Vec::new());
        let providers: Vec<Box<dyn ModelProvider<dyn TextModel> + '_>> = vec![
            Box::new(Recording { name: "a", loads: false, log: &log }),
            Box::new(Recording { name: "b", loads: true, log: &log }),
            Box::new(Recording { name: "c", loads: true, log: &log }),
        ];

        let selected = select_provider(Modality::Text, &providers).unwrap();
        assert_eq!(selected.name, "b");
        assert_eq!(selected.position, 1);
        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn test_all_candidates_fail() {
        let log = RefCell::new(Vec::new());
        let providers: Vec<Box<dyn ModelProvider<dyn TextModel> + '_>> = vec![
            Box::new(Recording { name: "a", loads: false, log: &log }),
            Box::new(Recording { name: "b", loads: false, log: &log }),
        ];

        match select_provider(Modality::Text, &providers) {
            Err(RetrievalError::ModelUnavailable(msg)) => {
                assert!(msg.contains("a: "));
                assert!(msg.contains("b: "));
            }
            _ => panic!("expected ModelUnavailable"),
        }
        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn test_configured_names_fall_back() {
        let names = vec!["mpnet-onnx".to_string(), "htp-5".to_string(), "htp-384".to_string()];
        let encoder = TextEncoder::initialize(&text_providers(&names, Path::new("/nonexistent")), false).unwrap();
        assert_eq!(encoder.model_name(), "htp-384");
        assert_eq!(encoder.dimension(), 384);
    }

    #[test]
    fn test_sentence_models_fall_back_to_named_last_resort() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = [
            "all-mpnet-base-v2",
            "paraphrase-MiniLM-L6-v2",
            "all-MiniLM-L6-v2",
            "htp-384",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let encoder = TextEncoder::initialize(&text_providers(&names, dir.path()), false).unwrap();
        assert_eq!(encoder.model_name(), "htp-384");
    }

    #[test]
    fn test_sentence_models_without_files_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let names = vec!["all-mpnet-base-v2".to_string(), "all-MiniLM-L6-v2".to_string()];

        match TextEncoder::initialize(&text_providers(&names, dir.path()), false) {
            Err(RetrievalError::ModelUnavailable(msg)) => {
                assert!(msg.contains("all-mpnet-base-v2: "));
                assert!(msg.contains("all-MiniLM-L6-v2: "));
                assert!(msg.contains("model.onnx not found"));
                assert!(!msg.contains("unknown model"));
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("loaded a model from an empty directory"),
        }
    }

    #[test]
    fn test_clip_falls_back_to_named_last_resort() {
        let dir = tempfile::tempdir().unwrap();
        let names = vec!["ViT-B/32".to_string(), "grid-stats-512".to_string()];
        let encoder = ImageEncoder::initialize(&image_providers(&names, dir.path())).unwrap();
        assert_eq!(encoder.model_name(), "grid-stats-512");

        let clip_only = vec!["ViT-B/32".to_string()];
        match ImageEncoder::initialize(&image_providers(&clip_only, dir.path())) {
            Err(RetrievalError::ModelUnavailable(msg)) => assert!(msg.contains("ViT-B-32")),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("loaded CLIP from an empty directory"),
        }
    }

    #[test]
    fn test_no_text_candidates() {
        assert!(matches!(
            TextEncoder::initialize(&text_providers(&[], Path::new("/nonexistent")), false),
            Err(RetrievalError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_text_encode() {
        let encoder = TextEncoder::initialize(&text_providers(&["htp-768".to_string()], Path::new("/nonexistent")), false).unwrap();
        let query = encoder.encode("black quilted bag").unwrap();
        assert_eq!(query.modality, Modality::Text);
        assert_eq!(query.dimension, 768);
        assert_eq!(query.values.len(), 768);
    }

    #[test]
    fn test_blank_text_is_empty_query() {
        let encoder = TextEncoder::initialize(&text_providers(&["htp-384".to_string()], Path::new("/nonexistent")), false).unwrap();
        assert!(matches!(encoder.encode("   "), Err(RetrievalError::EmptyQuery(_))));
    }

    #[test]
    fn test_encode_failure_is_typed_by_default() {
        let providers: Vec<Box<dyn ModelProvider<dyn TextModel>>> = vec![Box::new(BrokenProvider)];
        let encoder = TextEncoder::initialize(&providers, false).unwrap();
        assert!(matches!(
            encoder.encode("tweed"),
            Err(RetrievalError::EncodeFailed { .. })
        ));
    }

    #[test]
    fn test_degraded_fallback_returns_zero_vector() {
        let providers: Vec<Box<dyn ModelProvider<dyn TextModel>>> = vec![Box::new(BrokenProvider)];
        let encoder = TextEncoder::initialize(&providers, true).unwrap();
        let query = encoder.encode("tweed").unwrap();
        assert_eq!(query.values, vec![0.0; 4]);
        assert_eq!(query.dimension, 4);
    }

    #[test]
    fn test_image_encoder() {
        let encoder = ImageEncoder::initialize(&image_providers(&["grid-stats-512".to_string()], Path::new("/nonexistent"))).unwrap();
        let image = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(64, 48, image::Rgb([90, 60, 30])));

        let query = encoder.encode(&image).unwrap();
        assert_eq!(query.modality, Modality::Image);
        assert_eq!(query.dimension, 512);
    }

    #[test]
    fn test_empty_image_is_empty_query() {
        let encoder = ImageEncoder::initialize(&image_providers(&["grid-stats".to_string()], Path::new("/nonexistent"))).unwrap();
        let empty = DynamicImage::ImageRgb8(image::RgbImage::new(0, 0));
        assert!(matches!(encoder.encode(&empty), Err(RetrievalError::EmptyQuery(_))));
    }

    #[test]
    fn test_no_visual_model() {
        assert!(matches!(
            ImageEncoder::initialize(&image_providers(&["vit_base_patch16_224".to_string()], Path::new("/nonexistent"))),
            Err(RetrievalError::ModelUnavailable(_))
        ));
    }
}
