//! Error types for the scoring engine.
//!
//! Only malformed top-level input and runner I/O surface as errors; data
//! problems inside records degrade to low scores instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScoringError>;

#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("Invalid input shape: {0}")]
    InputShape(String),

    #[error("No ground truth for document: {0}")]
    MissingGroundTruth(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
