//! Semantic backend trait and vector utilities.
//!
//! Defines the [`SemanticBackend`] trait the matcher calls into, plus the
//! pure similarity helpers shared by every backend.
//!
//! Concrete backends (OpenAI, Ollama, fastembed) live in the
//! `catalog-watch` app crate.

use async_trait::async_trait;

use crate::error::MatchBackendError;

/// Embedding (and optional entailment) capability used by the semantic pass.
#[async_trait]
pub trait SemanticBackend: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MatchBackendError>;

    /// Similarity of two embeddings in `[0.0, 1.0]`.
    fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        unit_similarity(a, b)
    }

    /// Score how strongly `premise` supports `hypothesis`, in `[0.0, 1.0]`.
    ///
    /// Returns `Ok(None)` when the backend has no entailment model.
    async fn entails(
        &self,
        _premise: &str,
        _hypothesis: &str,
    ) -> Result<Option<f32>, MatchBackendError> {
        Ok(None)
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine similarity with anti-correlated vectors floored at zero, so the
/// result can be compared directly against a `[0, 1]` threshold.
pub fn unit_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity(a, b).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_unit_similarity_floors_opposites() {
        assert_eq!(unit_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert!((unit_similarity(&[3.0, 4.0], &[3.0, 4.0]) - 1.0).abs() < 1e-6);
    }
}
