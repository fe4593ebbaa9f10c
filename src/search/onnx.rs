//! ONNX Runtime query models
//!
//! Sentence-transformer text encoders and the CLIP ViT-B/32 image tower,
//! the models the catalog embeddings are computed with. Each model lives in
//! its own directory under `<models_dir>/onnx/`, named after the model with
//! `/` replaced by `-`:
//!
//! ```text
//! onnx/all-mpnet-base-v2/model.onnx
//! onnx/all-mpnet-base-v2/tokenizer.json
//! onnx/ViT-B-32/model.onnx
//! ```

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::{Array2, Array4, ArrayViewD, Axis};
use once_cell::sync::OnceCell;
use onnxruntime::environment::Environment;
use onnxruntime::session::Session;
use onnxruntime::{GraphOptimizationLevel, LoggingLevel};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use super::encoder::{ImageModel, ModelProvider, TextModel};
use crate::error::{Result, RetrievalError};

pub const MODEL_FILE: &str = "model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// A sentence-transformer checkpoint exported to ONNX
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentenceModel {
    pub name: &'static str,
    pub dimension: usize,
    /// Longest token sequence the checkpoint accepts
    pub max_tokens: usize,
}

pub const SENTENCE_MODELS: [SentenceModel; 3] = [
    SentenceModel {
        name: "all-mpnet-base-v2",
        dimension: 768,
        max_tokens: 384,
    },
    SentenceModel {
        name: "paraphrase-MiniLM-L6-v2",
        dimension: 384,
        max_tokens: 128,
    },
    SentenceModel {
        name: "all-MiniLM-L6-v2",
        dimension: 384,
        max_tokens: 256,
    },
];

/// Look up a sentence model, with or without the `sentence-transformers/` prefix
pub fn sentence_model(name: &str) -> Option<SentenceModel> {
    let name = name.strip_prefix("sentence-transformers/").unwrap_or(name);
    SENTENCE_MODELS.iter().copied().find(|m| m.name == name)
}

pub const CLIP_VIT_B_32: &str = "ViT-B/32";
pub const CLIP_DIM: usize = 512;

const CLIP_INPUT: u32 = 224;
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Directory holding the files of model `name`
pub fn model_dir(models_dir: &Path, name: &str) -> PathBuf {
    models_dir.join("onnx").join(name.replace('/', "-"))
}

static ORT_ENV: OnceCell<Environment> = OnceCell::new();

fn ort_environment() -> Result<&'static Environment> {
    ORT_ENV.get_or_try_init(|| {
        Environment::builder()
            .with_name("product-finder")
            .with_log_level(LoggingLevel::Warning)
            .build()
            .map_err(|e| RetrievalError::ModelUnavailable(format!("onnxruntime: {e}")))
    })
}

/// An ONNX Runtime session owned by one model.
struct OrtSession(Session<'static>);

// SAFETY: the session is only reached through `&mut self` on the model,
// and encoders keep each model behind a mutex, so one thread at a time
// drives it. ONNX Runtime sessions are not tied to the creating thread.
unsafe impl Send for OrtSession {}

fn open_session(path: &Path) -> Result<OrtSession> {
    let session = ort_environment()?
        .new_session_builder()
        .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Basic))
        .and_then(|builder| builder.with_model_from_file(path.to_path_buf()))
        .map_err(|e| RetrievalError::ModelUnavailable(format!("{}: {e}", path.display())))?;
    Ok(OrtSession(session))
}

fn require_file(path: PathBuf) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(RetrievalError::ModelUnavailable(format!(
            "{} not found",
            path.display()
        )))
    }
}

fn inference_error(model: &str, err: impl Display) -> RetrievalError {
    RetrievalError::EncodeFailed {
        model: model.to_string(),
        reason: err.to_string(),
    }
}

/// Sentence-transformer text model loaded from `<models_dir>/onnx/<name>/`
pub struct OnnxTextProvider {
    checkpoint: SentenceModel,
    dir: PathBuf,
}

impl OnnxTextProvider {
    pub fn new(checkpoint: SentenceModel, models_dir: &Path) -> Self {
        Self {
            checkpoint,
            dir: model_dir(models_dir, checkpoint.name),
        }
    }
}

impl ModelProvider<dyn TextModel> for OnnxTextProvider {
    fn name(&self) -> &str {
        self.checkpoint.name
    }

    fn load(&self) -> Result<Box<dyn TextModel>> {
        let model_path = require_file(self.dir.join(MODEL_FILE))?;
        let tokenizer_path = require_file(self.dir.join(TOKENIZER_FILE))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            RetrievalError::ModelUnavailable(format!("{}: {e}", tokenizer_path.display()))
        })?;
        let session = open_session(&model_path)?;

        for input in &session.0.inputs {
            if !matches!(
                input.name.as_str(),
                "input_ids" | "attention_mask" | "token_type_ids"
            ) {
                return Err(RetrievalError::ModelUnavailable(format!(
                    "{}: unsupported model input '{}'",
                    model_path.display(),
                    input.name
                )));
            }
        }

        tracing::debug!(model = self.checkpoint.name, path = %model_path.display(), "onnx text model loaded");
        Ok(Box::new(OnnxTextModel {
            checkpoint: self.checkpoint,
            tokenizer,
            session,
        }))
    }
}

struct OnnxTextModel {
    checkpoint: SentenceModel,
    tokenizer: Tokenizer,
    session: OrtSession,
}

impl TextModel for OnnxTextModel {
    fn dimension(&self) -> usize {
        self.checkpoint.dimension
    }

    fn embed(&mut self, text: &str) -> Result<Vec<f32>> {
        let name = self.checkpoint.name;
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| inference_error(name, e))?;

        let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&x| x as i64).collect();
        let mut mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&x| x as i64)
            .collect();
        ids.truncate(self.checkpoint.max_tokens);
        mask.truncate(self.checkpoint.max_tokens);
        let seq_len = ids.len();

        let input_ids = Array2::from_shape_vec((1, seq_len), ids).map_err(|e| inference_error(name, e))?;
        let attention_mask =
            Array2::from_shape_vec((1, seq_len), mask.clone()).map_err(|e| inference_error(name, e))?;

        let session = &mut self.session.0;
        let mut inputs = Vec::with_capacity(session.inputs.len());
        for input in &session.inputs {
            match input.name.as_str() {
                "input_ids" => inputs.push(input_ids.clone().into_dyn()),
                "attention_mask" => inputs.push(attention_mask.clone().into_dyn()),
                _ => inputs.push(Array2::<i64>::zeros((1, seq_len)).into_dyn()),
            }
        }

        // Exports with a pooling head name it `sentence_embedding`
        let pooled_output = session
            .outputs
            .iter()
            .position(|o| o.name == "sentence_embedding");

        let outputs = session
            .run::<i64, f32, _>(inputs)
            .map_err(|e| inference_error(name, e))?;
        let hidden = outputs
            .get(pooled_output.unwrap_or(0))
            .ok_or_else(|| inference_error(name, "model returned no outputs"))?;

        let mut embedding = mean_pool(hidden.view(), &mask).map_err(|e| inference_error(name, e))?;
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

/// Attention-masked mean over token embeddings.
///
/// Accepts `[1, seq, dim]` token embeddings, or `[1, dim]` when the export
/// already pools.
fn mean_pool(hidden: ArrayViewD<'_, f32>, mask: &[i64]) -> std::result::Result<Vec<f32>, String> {
    match hidden.ndim() {
        2 => Ok(hidden.index_axis(Axis(0), 0).iter().copied().collect()),
        3 => {
            let tokens = hidden.index_axis(Axis(0), 0);
            let shape = tokens.shape();
            if shape[0] != mask.len() {
                return Err(format!(
                    "model returned {} token embeddings for {} tokens",
                    shape[0],
                    mask.len()
                ));
            }

            let mut pooled = vec![0.0f32; shape[1]];
            let mut count = 0.0f32;
            for (row, &keep) in tokens.outer_iter().zip(mask) {
                if keep == 0 {
                    continue;
                }
                for (sum, value) in pooled.iter_mut().zip(row.iter()) {
                    *sum += value;
                }
                count += 1.0;
            }
            if count == 0.0 {
                return Err("no unmasked tokens".to_string());
            }
            for sum in &mut pooled {
                *sum /= count;
            }
            Ok(pooled)
        }
        rank => Err(format!("unexpected output rank {rank}")),
    }
}

fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

/// CLIP ViT-B/32 image tower loaded from `<models_dir>/onnx/ViT-B-32/`
pub struct ClipImageProvider {
    dir: PathBuf,
}

impl ClipImageProvider {
    pub fn new(models_dir: &Path) -> Self {
        Self {
            dir: model_dir(models_dir, CLIP_VIT_B_32),
        }
    }
}

impl ModelProvider<dyn ImageModel> for ClipImageProvider {
    fn name(&self) -> &str {
        CLIP_VIT_B_32
    }

    fn load(&self) -> Result<Box<dyn ImageModel>> {
        let model_path = require_file(self.dir.join(MODEL_FILE))?;
        let session = open_session(&model_path)?;

        if session.0.inputs.len() != 1 {
            return Err(RetrievalError::ModelUnavailable(format!(
                "{}: expected one pixel input, found {}",
                model_path.display(),
                session.0.inputs.len()
            )));
        }

        tracing::debug!(model = CLIP_VIT_B_32, path = %model_path.display(), "onnx image model loaded");
        Ok(Box::new(ClipImageModel { session }))
    }
}

struct ClipImageModel {
    session: OrtSession,
}

impl ImageModel for ClipImageModel {
    fn dimension(&self) -> usize {
        CLIP_DIM
    }

    fn embed(&mut self, image: &DynamicImage) -> Result<Vec<f32>> {
        let pixels = clip_pixels(image);

        let session = &mut self.session.0;
        let projected = session.outputs.iter().position(|o| o.name == "image_embeds");

        let outputs = session
            .run::<f32, f32, _>(vec![pixels.into_dyn()])
            .map_err(|e| inference_error(CLIP_VIT_B_32, e))?;
        let embeds = outputs
            .get(projected.unwrap_or(0))
            .ok_or_else(|| inference_error(CLIP_VIT_B_32, "model returned no outputs"))?;

        Ok(embeds.iter().copied().collect())
    }
}

/// CLIP preprocessing: bicubic resize of the short side to 224, center
/// crop to 224x224, then per-channel mean/std normalization. NCHW layout.
pub fn clip_pixels(image: &DynamicImage) -> Array4<f32> {
    let (width, height) = (image.width().max(1), image.height().max(1));
    let scale = CLIP_INPUT as f32 / width.min(height) as f32;
    let resized_w = ((width as f32 * scale).round() as u32).max(CLIP_INPUT);
    let resized_h = ((height as f32 * scale).round() as u32).max(CLIP_INPUT);

    let rgb = image
        .resize_exact(resized_w, resized_h, FilterType::CatmullRom)
        .crop_imm(
            (resized_w - CLIP_INPUT) / 2,
            (resized_h - CLIP_INPUT) / 2,
            CLIP_INPUT,
            CLIP_INPUT,
        )
        .to_rgb8();

    let side = CLIP_INPUT as usize;
    Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
        let value = rgb.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0;
        (value - CLIP_MEAN[c]) / CLIP_STD[c]
    })
}
