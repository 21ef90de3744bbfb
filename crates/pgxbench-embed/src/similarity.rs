//! Similarity providers consumed by the semantic evaluator.
//!
//! Three implementations:
//! - [`LazyEmbedder`] (production): sentence embeddings, loaded on first use
//! - [`LexicalSimilarity`]: character-level ratio, no model required
//! - [`MockSimilarityProvider`] (testing)

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use pgxbench_common::text::{fold, sequence_ratio};
use tracing::warn;

use crate::{EmbedError, EmbeddingConfig, Result, SentenceEmbedder};

/// Scores how alike two short strings are, in [0, 1] (higher is closer).
///
/// Implementations must be safe to share across concurrent evaluations.
pub trait SimilarityProvider: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> Result<f64>;

    /// Short label for logs.
    fn name(&self) -> &str {
        "similarity"
    }
}

pub type SharedSimilarity = Arc<dyn SimilarityProvider>;

/// Cosine similarity of two vectors. Zero vectors or mismatched lengths give 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

impl SimilarityProvider for SentenceEmbedder {
    fn similarity(&self, a: &str, b: &str) -> Result<f64> {
        SentenceEmbedder::similarity(self, a, b)
    }

    fn name(&self) -> &str {
        self.model_name()
    }
}

// ── Lazily loaded embedder ──────────────────────────────────────────────────

/// Embedding provider that loads its model on the first call and keeps it
/// for the life of the process. A failed load is remembered and reported on
/// every later call instead of retrying the download.
pub struct LazyEmbedder {
    config: EmbeddingConfig,
    model: OnceLock<std::result::Result<SentenceEmbedder, String>>,
}

impl LazyEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            model: OnceLock::new(),
        }
    }

    fn model(&self) -> Result<&SentenceEmbedder> {
        self.model
            .get_or_init(|| {
                SentenceEmbedder::load(self.config.clone()).map_err(|e| {
                    warn!("Embedding model {} unavailable: {}", self.config.model_id, e);
                    e.to_string()
                })
            })
            .as_ref()
            .map_err(|msg| EmbedError::Unavailable(msg.clone()))
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.model.get(), Some(Ok(_)))
    }
}

impl SimilarityProvider for LazyEmbedder {
    fn similarity(&self, a: &str, b: &str) -> Result<f64> {
        self.model()?.similarity(a, b)
    }

    fn name(&self) -> &str {
        &self.config.model_id
    }
}

// ── Lexical fallback ─────────────────────────────────────────────────────────

/// Sequence-matching ratio over case-folded text.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalSimilarity;

impl SimilarityProvider for LexicalSimilarity {
    fn similarity(&self, a: &str, b: &str) -> Result<f64> {
        Ok(sequence_ratio(&fold(a), &fold(b)))
    }

    fn name(&self) -> &str {
        "lexical"
    }
}

// ── Mock Implementation for Testing ────────────────────────────────────────

/// Table-driven provider for unit tests. Lookups are symmetric.
pub struct MockSimilarityProvider {
    data: HashMap<(String, String), f64>,
    default: f64,
    failing: bool,
}

impl MockSimilarityProvider {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            default: 0.0,
            failing: false,
        }
    }

    /// Add a score for a pair of strings.
    pub fn with(mut self, a: &str, b: &str, score: f64) -> Self {
        self.data.insert((a.to_string(), b.to_string()), score);
        self
    }

    /// Score returned for pairs not in the table.
    pub fn with_default(mut self, score: f64) -> Self {
        self.default = score;
        self
    }

    /// Every call errors, as an unreachable model would.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }
}

impl Default for MockSimilarityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityProvider for MockSimilarityProvider {
    fn similarity(&self, a: &str, b: &str) -> Result<f64> {
        if self.failing {
            return Err(EmbedError::Unavailable("mock provider set to fail".to_string()));
        }
        let forward = (a.to_string(), b.to_string());
        let backward = (b.to_string(), a.to_string());
        Ok(self
            .data
            .get(&forward)
            .or_else(|| self.data.get(&backward))
            .copied()
            .unwrap_or(self.default))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_basic() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine(&[], &[]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_mock_provider_is_symmetric() {
        let provider = MockSimilarityProvider::new()
            .with("reduced clearance", "decreased clearance", 0.92)
            .with_default(0.1);

        assert_eq!(provider.similarity("reduced clearance", "decreased clearance").unwrap(), 0.92);
        assert_eq!(provider.similarity("decreased clearance", "reduced clearance").unwrap(), 0.92);
        assert_eq!(provider.similarity("warfarin", "aspirin").unwrap(), 0.1);
    }

    #[test]
    fn test_failing_mock_errors() {
        let provider = MockSimilarityProvider::failing();
        assert!(matches!(
            provider.similarity("a", "b"),
            Err(EmbedError::Unavailable(_))
        ));
    }

    #[test]
    fn test_lexical_ignores_case_and_spacing() {
        let provider = LexicalSimilarity;
        assert_eq!(provider.similarity("Poor  Metabolizer", "poor metabolizer").unwrap(), 1.0);
        assert!(provider.similarity("CYP2C19", "CYP2D6").unwrap() < 1.0);
    }

    #[test]
    fn test_shared_provider_object() {
        let shared: SharedSimilarity = Arc::new(MockSimilarityProvider::new().with_default(0.5));
        let clone = Arc::clone(&shared);
        assert_eq!(clone.similarity("x", "y").unwrap(), 0.5);
        assert_eq!(shared.name(), "mock");
    }
}
