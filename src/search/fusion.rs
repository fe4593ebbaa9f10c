//! Weighted score fusion of an image ranking and a text ranking
//!
//! ```text
//! combined(i) = weight_image * image_score(i) + weight_text * text_score(i)
//! ```
//!
//! Both rankings should cover the whole catalog; an index present in only
//! one of them scores 0 for the other. Weights are used as given and are
//! not renormalized: making them sum to 1 is up to the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ranker::{canonical_score, result_order, RankedResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub image: f32,
    pub text: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { image: 0.5, text: 0.5 }
    }
}

impl FusionWeights {
    pub fn new(image: f32, text: f32) -> Self {
        Self { image, text }
    }
}

/// Fuse two rankings and keep the best `top_k`
pub fn fuse(
    image_ranking: &[RankedResult],
    text_ranking: &[RankedResult],
    weights: FusionWeights,
    top_k: usize,
) -> Vec<RankedResult> {
    // (image score, text score) per index
    let mut scores: BTreeMap<usize, (f32, f32)> = BTreeMap::new();

    for result in image_ranking {
        scores.entry(result.index).or_insert((0.0, 0.0)).0 = result.score;
    }
    for result in text_ranking {
        scores.entry(result.index).or_insert((0.0, 0.0)).1 = result.score;
    }

    let mut combined: Vec<RankedResult> = scores
        .into_iter()
        .map(|(index, (image, text))| RankedResult {
            index,
            score: canonical_score(weights.image * image + weights.text * text),
        })
        .collect();

    combined.sort_by(result_order);
    combined.truncate(top_k);
    combined
}
