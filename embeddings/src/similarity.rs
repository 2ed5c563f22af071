//! Similarity computation for embeddings.

use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingError, Result};

/// Compute the cosine similarity between two vectors of any length.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical direction
/// - 0.0 means orthogonal vectors
/// - -1.0 means opposite vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    let dot = dot_product(a, b)?;
    let magnitude_a = magnitude(a);
    let magnitude_b = magnitude(b);

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (magnitude_a * magnitude_b))
}

/// Compute the dot product between two vectors.
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    Ok(dot(a, b))
}

/// Dot product of two rows already known to share a dimension.
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Euclidean length of a vector.
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale a vector to unit length.
///
/// A zero vector has no direction; dividing by its zero length leaves NaN
/// components, which never rank as a neighbor.
pub fn normalize(v: &mut [f32]) {
    let len = magnitude(v);
    for x in v.iter_mut() {
        *x /= len;
    }
}

/// A word and its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// The neighboring word.
    pub word: String,

    /// Cosine similarity to the query.
    pub score: f64,
}

impl Neighbor {
    pub fn new(word: impl Into<String>, score: f64) -> Self {
        Self {
            word: word.into(),
            score,
        }
    }
}

/// Lowest score a candidate has to beat to be kept at all.
pub const SCORE_FLOOR: f32 = -1.0;

/// Keeps the best `capacity` candidates seen so far, best first.
///
/// A candidate is admitted when its score strictly exceeds a kept score (or
/// the floor, while there is room). Equal scores never displace each other,
/// so among ties the earliest candidate ranks first.
#[derive(Debug)]
pub struct TopN<T> {
    capacity: usize,
    entries: Vec<(T, f32)>,
}

impl<T> TopN<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Offer a candidate.
    pub fn push(&mut self, item: T, score: f32) {
        match self.entries.iter().position(|&(_, kept)| score > kept) {
            Some(pos) => {
                if self.entries.len() == self.capacity {
                    self.entries.pop();
                }
                self.entries.insert(pos, (item, score));
            }
            None if self.entries.len() < self.capacity && score > SCORE_FLOOR => {
                self.entries.push((item, score));
            }
            None => {}
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The kept candidates, best first.
    pub fn into_sorted_vec(self) -> Vec<(T, f32)> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &b).is_err());
        assert!(dot_product(&a, &b).is_err());
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_is_nan() {
        let mut v = vec![0.0, 0.0];
        normalize(&mut v);
        assert!(v.iter().all(|x| x.is_nan()));
    }

    #[test]
    fn test_top_n_keeps_best_in_order() {
        let mut top = TopN::new(3);
        for (item, score) in [("a", 0.1), ("b", 0.9), ("c", 0.5), ("d", 0.7), ("e", -0.2)] {
            top.push(item, score);
        }
        let kept: Vec<&str> = top.into_sorted_vec().into_iter().map(|(i, _)| i).collect();
        assert_eq!(kept, vec!["b", "d", "c"]);
    }

    #[test]
    fn test_top_n_ties_keep_earliest() {
        let mut top = TopN::new(2);
        top.push("first", 0.5);
        top.push("second", 0.5);
        top.push("third", 0.5);
        let kept: Vec<&str> = top.into_sorted_vec().into_iter().map(|(i, _)| i).collect();
        assert_eq!(kept, vec!["first", "second"]);
    }

    #[test]
    fn test_top_n_floor_and_nan() {
        let mut top = TopN::new(4);
        top.push("opposite", -1.0);
        top.push("nan", f32::NAN);
        assert!(top.is_empty());
        top.push("barely", -0.99);
        assert_eq!(top.len(), 1);
    }
}
