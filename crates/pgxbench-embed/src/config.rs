//! Configuration for the sentence embedder.

use serde::{Deserialize, Serialize};

/// Configuration for [`SentenceEmbedder`](crate::SentenceEmbedder).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Hugging Face model ID
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Maximum sequence length; annotation values are short so this rarely binds
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Pooling strategy (default: mean)
    #[serde(default)]
    pub pooling: crate::PoolingStrategy,

    /// Use GPU if available
    #[serde(default)]
    pub use_gpu: bool,

    /// Maximum number of cached embeddings (0 disables the cache)
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

fn default_model_id() -> String { "pritamdeka/S-PubMedBert-MS-MARCO".to_string() }
fn default_max_length() -> usize { 128 }
fn default_cache_size() -> usize { 4_096 }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            max_length: default_max_length(),
            pooling: crate::PoolingStrategy::Mean,
            use_gpu: false,
            cache_size: default_cache_size(),
        }
    }
}

impl EmbeddingConfig {
    /// CPU-only inference.
    pub fn cpu() -> Self {
        Self::default()
    }

    /// Prefer a GPU device when one is compiled in and available.
    pub fn gpu() -> Self {
        Self {
            use_gpu: true,
            ..Default::default()
        }
    }

    /// Use a custom model.
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }
}
