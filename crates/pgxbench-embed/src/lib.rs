//! pgxbench embedding similarity
//!
//! Semantic comparison of short annotation strings ("reduced clearance" vs
//! "decreased clearance") backed by a biomedical sentence-embedding model running
//! in pure Rust on Candle.
//!
//! The scoring engine only sees the [`SimilarityProvider`] trait. Production code
//! hands it a [`LazyEmbedder`], which downloads and loads the model on first use and
//! shares it across evaluations; tests hand it a [`MockSimilarityProvider`].
//!
//! # Example
//! ```rust,no_run
//! use pgxbench_embed::{EmbeddingConfig, LazyEmbedder, SimilarityProvider};
//!
//! let provider = LazyEmbedder::new(EmbeddingConfig::cpu());
//! let s = provider.similarity("poor metabolizer", "reduced CYP2C19 activity")?;
//! println!("cosine similarity: {s:.3}");
//! # Ok::<(), pgxbench_embed::EmbedError>(())
//! ```

pub mod config;
pub mod embedder;
pub mod error;
pub mod pooling;
pub mod similarity;

pub use config::EmbeddingConfig;
pub use embedder::SentenceEmbedder;
pub use error::{EmbedError, Result};
pub use pooling::PoolingStrategy;
pub use similarity::{
    cosine, LazyEmbedder, LexicalSimilarity, MockSimilarityProvider, SharedSimilarity,
    SimilarityProvider,
};
