//! pgxbench-common: shared record types, errors, and configuration used across the pgxbench crates.

pub mod error;
pub mod record;
pub mod config;
pub mod text;

// Re-export commonly used types
pub use config::{EvaluationConfig, PenaltyPolicy, ToleranceBands};
pub use error::{PgxError, Result};
pub use record::{AnnotationRecord, fields};
