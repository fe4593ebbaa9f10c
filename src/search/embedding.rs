//! Harmonic Token Projection (HTP) text embedding
//!
//! A deterministic, training-free embedding method based on:
//! "Harmonic Token Projection: A Vocabulary-Free, Training-Free,
//!  Deterministic, and Reversible Embedding Methodology"
//! https://arxiv.org/html/2511.20665
//!
//! Each token is read as a base-2^16 integer and reduced modulo a set of
//! coprime moduli; every residue becomes a point on the unit circle. The
//! output dimension is twice the number of moduli, so any even dimension
//! can be produced by taking that many primes.

use std::f64::consts::PI;

/// Dimension of the basic text variant
pub const BASIC_DIM: usize = 384;

/// Dimension of the improved text variant
pub const IMPROVED_DIM: usize = 768;

/// Largest dimension an HTP model accepts
pub const MAX_DIM: usize = 4096;

/// Maximum token length (Unicode code points)
const MAX_TOKEN_LENGTH: usize = 64;

/// HTP embedding model with a fixed output dimension
#[derive(Debug, Clone)]
pub struct HtpModel {
    moduli: Vec<u64>,
}

impl HtpModel {
    /// Create a model producing `dimension`-long vectors.
    ///
    /// Returns `None` for an odd, zero, or oversized dimension.
    pub fn new(dimension: usize) -> Option<Self> {
        if dimension == 0 || dimension % 2 != 0 || dimension > MAX_DIM {
            return None;
        }
        Some(Self {
            moduli: first_primes(dimension / 2),
        })
    }

    pub fn dimension(&self) -> usize {
        self.moduli.len() * 2
    }

    /// Generate embedding for a single text
    ///
    /// Algorithm:
    /// 1. Tokenize text into words
    /// 2. Embed each token using harmonic projection
    /// 3. Average token embeddings (mean pooling)
    /// 4. L2 normalize result
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension();
        let tokens = tokenize(text);

        if tokens.is_empty() {
            return vec![0.0; dim];
        }

        let mut sum_embedding = vec![0.0f64; dim];
        for token in &tokens {
            for (i, val) in self.embed_token(token).iter().enumerate() {
                sum_embedding[i] += val;
            }
        }

        let count = tokens.len() as f64;
        for val in &mut sum_embedding {
            *val /= count;
        }

        let norm: f64 = sum_embedding.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            sum_embedding.iter().map(|x| (*x / norm) as f32).collect()
        } else {
            sum_embedding.iter().map(|x| *x as f32).collect()
        }
    }

    /// Project one token: E_i = [sin(2πr_i/m_i), cos(2πr_i/m_i)] with r_i = N mod m_i
    fn embed_token(&self, token: &str) -> Vec<f64> {
        let n = token_to_integer(token);

        let mut embedding = Vec::with_capacity(self.dimension());
        for &m in &self.moduli {
            let r = n % m;
            let theta = 2.0 * PI * (r as f64) / (m as f64);
            embedding.push(theta.sin());
            embedding.push(theta.cos());
        }

        embedding
    }
}

/// N = Σ u_j * B^(L-j) where B = 2^16, wrapping on overflow
fn token_to_integer(token: &str) -> u64 {
    token
        .chars()
        .take(MAX_TOKEN_LENGTH)
        .fold(0u64, |n, c| n.wrapping_mul(65536).wrapping_add(c as u64))
}

/// First `count` primes, used as pairwise-coprime moduli
fn first_primes(count: usize) -> Vec<u64> {
    let mut primes: Vec<u64> = Vec::with_capacity(count);
    let mut candidate = 2u64;
    while primes.len() < count {
        if primes
            .iter()
            .take_while(|&&p| p * p <= candidate)
            .all(|&p| candidate % p != 0)
        {
            primes.push(candidate);
        }
        candidate += 1;
    }
    primes
}

/// Splits text into lowercase words
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// Cosine similarity between two embeddings; 0 when either norm is zero
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_htp_basic() {
        let model = HtpModel::new(BASIC_DIM).unwrap();

        let emb1 = model.embed("quilted leather bag");
        let emb2 = model.embed("quilted leather bag");
        let emb3 = model.embed("tweed jacket");

        assert_eq!(emb1, emb2);
        assert_ne!(emb1, emb3);
        assert_eq!(emb1.len(), BASIC_DIM);
    }

    #[test]
    fn test_improved_dimension() {
        let model = HtpModel::new(IMPROVED_DIM).unwrap();
        let emb = model.embed("ballerina flats");
        assert_eq!(emb.len(), IMPROVED_DIM);

        let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_rejects_invalid_dimensions() {
        assert!(HtpModel::new(0).is_none());
        assert!(HtpModel::new(385).is_none());
        assert!(HtpModel::new(MAX_DIM + 2).is_none());
    }

    #[test]
    fn test_shared_tokens_raise_similarity() {
        let model = HtpModel::new(BASIC_DIM).unwrap();

        let bag = model.embed("black quilted bag");
        let similar = model.embed("quilted bag");
        let unrelated = model.embed("perfume bottle");

        assert!(cosine_similarity(&bag, &similar) > cosine_similarity(&bag, &unrelated));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let model = HtpModel::new(BASIC_DIM).unwrap();
        assert!(model.embed(" ,;! ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_first_primes() {
        assert_eq!(first_primes(6), vec![2, 3, 5, 7, 11, 13]);
        assert_eq!(first_primes(384).len(), 384);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);

        let zero = vec![0.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &zero), 0.0);
    }
}
