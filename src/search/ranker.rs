//! Exhaustive cosine ranking of a query against one embedding matrix

use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;

use super::embedding::cosine_similarity;
use super::encoder::QueryVector;
use super::store::EmbeddingMatrix;
use crate::error::{Result, RetrievalError};

/// A catalog index with its similarity score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankedResult {
    pub index: usize,
    pub score: f32,
}

/// Descending score, then ascending index.
///
/// Scores must already be canonical (see [`canonical_score`]), otherwise
/// `-0.0` would sort below `0.0`.
pub(crate) fn result_order(a: &RankedResult, b: &RankedResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.index.cmp(&b.index))
}

/// Non-finite scores become 0 and `-0.0` becomes `0.0`
pub(crate) fn canonical_score(score: f32) -> f32 {
    if score.is_finite() {
        score + 0.0
    } else {
        0.0
    }
}

/// Score every row of `matrix` against `query` and keep the best `top_k`.
///
/// `top_k` larger than the matrix is clamped to the row count.
pub fn rank(query: &QueryVector, matrix: &EmbeddingMatrix, top_k: usize) -> Result<Vec<RankedResult>> {
    for actual in [query.dimension, query.values.len()] {
        if actual != matrix.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: matrix.dimension,
                actual,
            });
        }
    }

    let mut results: Vec<RankedResult> = matrix
        .vectors
        .par_iter()
        .enumerate()
        .map(|(index, row)| {
            let score = canonical_score(cosine_similarity(&query.values, row));
            RankedResult {
                index,
                score: score.clamp(-1.0, 1.0),
            }
        })
        .collect();

    results.sort_by(result_order);
    results.truncate(top_k);
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::store::Modality;

    fn matrix(modality: Modality, rows: Vec<Vec<f32>>) -> EmbeddingMatrix {
        let dim = rows[0].len();
        EmbeddingMatrix::new(modality, "test", dim, rows).unwrap()
    }

    fn sample() -> EmbeddingMatrix {
        matrix(
            Modality::Image,
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.7, 0.7, 0.0],
                vec![-1.0, 0.0, 0.0],
                vec![0.0, 0.0, 0.0],
                vec![2.0, 0.0, 0.0],
            ],
        )
    }

    #[test]
    fn test_scores_within_bounds() {
        let query = QueryVector::new(Modality::Image, vec![0.3, -0.9, 0.2]);
        for result in rank(&query, &sample(), 10).unwrap() {
            assert!((-1.0..=1.0).contains(&result.score));
        }
    }

    #[test]
    fn test_self_similarity_is_one() {
        let m = sample();
        let query = QueryVector::new(Modality::Image, m.vectors[2].clone());
        let top = rank(&query, &m, 1).unwrap();
        assert_eq!(top[0].index, 2);
        assert!((top[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sorted_with_index_tie_break() {
        let query = QueryVector::new(Modality::Image, vec![1.0, 0.0, 0.0]);
        let results = rank(&query, &sample(), 10).unwrap();

        // rows 0 and 5 point the same way and tie at 1.0
        assert_eq!(results[0].index, 0);
        assert_eq!(results[1].index, 5);
        for pair in results.windows(2) {
            assert!(
                pair[0].score > pair[1].score
                    || (pair[0].score == pair[1].score && pair[0].index < pair[1].index)
            );
        }
        assert_eq!(results.last().unwrap().index, 3);
    }

    #[test]
    fn test_zero_norm_scores_zero() {
        let query = QueryVector::new(Modality::Image, vec![1.0, 0.0, 0.0]);
        let results = rank(&query, &sample(), 10).unwrap();
        let zero_row = results.iter().find(|r| r.index == 4).unwrap();
        assert_eq!(zero_row.score, 0.0);

        let zero_query = QueryVector::new(Modality::Image, vec![0.0; 3]);
        let results = rank(&zero_query, &sample(), 10).unwrap();
        assert!(results.iter().all(|r| r.score == 0.0));
        let order: Vec<usize> = results.iter().map(|r| r.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_top_k_clamped_to_rows() {
        let query = QueryVector::new(Modality::Image, vec![0.0, 1.0, 0.0]);
        assert_eq!(rank(&query, &sample(), 100).unwrap().len(), 6);
        assert_eq!(rank(&query, &sample(), 2).unwrap().len(), 2);
        assert!(rank(&query, &sample(), 0).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let text = matrix(Modality::Text, vec![vec![0.1; 768], vec![0.2; 768]]);
        let image_query = QueryVector::new(Modality::Image, vec![0.5; 512]);

        match rank(&image_query, &text, 5) {
            Err(RetrievalError::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, 768);
                assert_eq!(actual, 512);
            }
            other => panic!("expected DimensionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_signed_zero_ties_by_index() {
        // row 0 scores -0.0, row 1 scores 0.0
        let m = matrix(Modality::Image, vec![vec![0.0, -1.0], vec![0.0, 1.0]]);
        let query = QueryVector::new(Modality::Image, vec![-1.0, 0.0]);

        let results = rank(&query, &m, 2).unwrap();
        assert_eq!(results[0].index, 0);
        assert_eq!(results[1].index, 1);
        assert!(results.iter().all(|r| r.score.is_sign_positive()));
    }

    #[test]
    fn test_mismatch_reports_value_count() {
        let m = matrix(Modality::Image, vec![vec![1.0, 0.0, 0.0]]);
        let query = QueryVector {
            modality: Modality::Image,
            dimension: 3,
            values: vec![1.0, 0.0],
        };

        match rank(&query, &m, 1) {
            Err(RetrievalError::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("expected DimensionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_canonical_score() {
        assert!(canonical_score(-0.0).is_sign_positive());
        assert_eq!(canonical_score(f32::NAN), 0.0);
        assert_eq!(canonical_score(f32::INFINITY), 0.0);
        assert_eq!(canonical_score(-0.25), -0.25);
    }
}
