//! Visual query embedding
//!
//! The built-in grid-statistics model squashes a query image into a fixed
//! 224x224 RGB frame, then summarizes an 8x8 grid of that frame into a
//! 512-dimension descriptor.

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

/// Side length of the normalized query frame
pub const INPUT_SIZE: u32 = 224;

/// Dimension of the visual variant (`clip_embeddings`)
pub const VISUAL_DIM: usize = 512;

const GRID: u32 = 8;
const CELL: u32 = INPUT_SIZE / GRID;
const FEATURES_PER_CELL: usize = 8;

/// Resize to the model input frame and drop alpha / convert color space
pub fn normalize_image(image: &DynamicImage) -> RgbImage {
    image
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
        .to_rgb8()
}

/// Deterministic grid descriptor over a normalized frame.
///
/// Per cell: mean R, G, B; standard deviation R, G, B; mean absolute
/// horizontal and vertical luminance gradient. All channels are in [0, 1]
/// before pooling; the final vector is L2-normalized.
#[derive(Debug, Clone, Default)]
pub struct GridStatsModel;

impl GridStatsModel {
    pub fn new() -> Self {
        Self
    }

    pub fn dimension(&self) -> usize {
        (GRID * GRID) as usize * FEATURES_PER_CELL
    }

    /// Forward pass over a frame produced by [`normalize_image`]
    pub fn embed(&self, frame: &RgbImage) -> Vec<f32> {
        debug_assert_eq!(frame.dimensions(), (INPUT_SIZE, INPUT_SIZE));

        let pixel = |x: u32, y: u32| -> [f32; 3] {
            let p = frame.get_pixel(x, y).0;
            [p[0] as f32 / 255.0, p[1] as f32 / 255.0, p[2] as f32 / 255.0]
        };
        let luma = |rgb: [f32; 3]| 0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2];

        let mut features = Vec::with_capacity(self.dimension());
        let n = (CELL * CELL) as f32;

        for gy in 0..GRID {
            for gx in 0..GRID {
                let mut sum = [0.0f32; 3];
                let mut sum_sq = [0.0f32; 3];
                let mut grad_x = 0.0f32;
                let mut grad_y = 0.0f32;

                for y in gy * CELL..(gy + 1) * CELL {
                    for x in gx * CELL..(gx + 1) * CELL {
                        let rgb = pixel(x, y);
                        for c in 0..3 {
                            sum[c] += rgb[c];
                            sum_sq[c] += rgb[c] * rgb[c];
                        }
                        let l = luma(rgb);
                        if x + 1 < INPUT_SIZE {
                            grad_x += (luma(pixel(x + 1, y)) - l).abs();
                        }
                        if y + 1 < INPUT_SIZE {
                            grad_y += (luma(pixel(x, y + 1)) - l).abs();
                        }
                    }
                }

                for s in sum {
                    features.push(s / n);
                }
                for c in 0..3 {
                    let mean = sum[c] / n;
                    let var = (sum_sq[c] / n - mean * mean).max(0.0);
                    features.push(var.sqrt());
                }
                features.push(grad_x / n);
                features.push(grad_y / n);
            }
        }

        l2_normalize(&mut features);
        features
    }
}

fn l2_normalize(values: &mut [f32]) {
    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}
