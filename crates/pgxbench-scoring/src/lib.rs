//! pgxbench scoring engine
//!
//! Scores extracted pharmacogenomic annotations against curated ground truth.
//! Four annotation tasks are supported (phenotype, drug, functional analysis and
//! study parameters). Each task is evaluated in the same pipeline:
//!
//! 1. multi-variant records are expanded to one record per variant
//! 2. predictions are aligned to ground-truth records ([`align`])
//! 3. every schema field of every pair is scored ([`evaluators`])
//! 4. predictions violating cross-field rules are penalised ([`validate`])
//! 5. field means and the weighted overall score are computed ([`aggregate`])
//!
//! [`runner`] applies this to whole documents and document sets.
//!
//! # Example
//! ```rust
//! use pgxbench_common::{fields, AnnotationRecord};
//! use pgxbench_embed::MockSimilarityProvider;
//! use pgxbench_scoring::{evaluate, TaskKind};
//!
//! let record = AnnotationRecord::new()
//!     .with(fields::VARIANT, "rs4244285")
//!     .with(fields::GENE, "CYP2C19")
//!     .with(fields::DRUGS, "clopidogrel");
//! let result = evaluate(
//!     TaskKind::Drug,
//!     &[record.clone()],
//!     &[record],
//!     &MockSimilarityProvider::new(),
//! );
//! assert!((result.overall_score - 1.0).abs() < 1e-9);
//! ```

pub mod aggregate;
pub mod align;
pub mod error;
pub mod evaluators;
pub mod runner;
pub mod schema;
pub mod tokenize;
pub mod validate;

pub use aggregate::{DatasetResult, EvaluationStatus, SampleResult, TaskEvaluator};
pub use align::{align, AlignedPair, Alignment, MatchTier};
pub use error::{Result, ScoringError};
pub use evaluators::{Evaluator, FieldScorer};
pub use runner::{BenchmarkRunner, BenchmarkSummary, DocumentAnnotations, DocumentReport, GroundTruth};
pub use schema::{FieldSpec, TaskKind, TaskSchema};
pub use validate::{validate, DependencyIssue, ViolationKind};

use pgxbench_common::{AnnotationRecord, EvaluationConfig};
use pgxbench_embed::SimilarityProvider;
use serde_json::Value;

/// Evaluate one task with the default configuration.
pub fn evaluate(
    kind: TaskKind,
    gt: &[AnnotationRecord],
    pred: &[AnnotationRecord],
    provider: &dyn SimilarityProvider,
) -> DatasetResult {
    let config = EvaluationConfig::default();
    TaskEvaluator::new(kind, provider, &config).evaluate(gt, pred)
}

/// Evaluate a raw `[ground_truth, prediction]` pair.
///
/// Each side may be a single record object or a list of record objects.
/// Anything else is rejected with [`ScoringError::InputShape`].
pub fn evaluate_samples(
    kind: TaskKind,
    samples: &Value,
    provider: &dyn SimilarityProvider,
    config: &EvaluationConfig,
) -> Result<DatasetResult> {
    let (gt, pred) = match samples.as_array().map(Vec::as_slice) {
        Some([gt, pred]) => (records_from_value(gt)?, records_from_value(pred)?),
        Some(items) => {
            return Err(ScoringError::InputShape(format!(
                "expected [ground_truth, prediction], got {} elements",
                items.len()
            )))
        }
        None => {
            return Err(ScoringError::InputShape(
                "expected a two-element array".to_string(),
            ))
        }
    };
    Ok(TaskEvaluator::new(kind, provider, config).evaluate(&gt, &pred))
}

/// Accept either one record object or an array of record objects.
pub fn records_from_value(value: &Value) -> Result<Vec<AnnotationRecord>> {
    match value {
        Value::Object(map) => Ok(vec![AnnotationRecord::from(map.clone())]),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                AnnotationRecord::from_value(item.clone())
                    .map_err(|e| ScoringError::InputShape(format!("record {i}: {e}")))
            })
            .collect(),
        _ => Err(ScoringError::InputShape(
            "expected a record object or a list of records".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgxbench_embed::MockSimilarityProvider;
    use serde_json::json;

    #[test]
    fn test_records_from_value_shapes() {
        assert_eq!(records_from_value(&json!({"Gene": "CYP2D6"})).unwrap().len(), 1);
        assert_eq!(records_from_value(&json!([{}, {}])).unwrap().len(), 2);
        assert!(records_from_value(&json!([])).unwrap().is_empty());
        assert!(matches!(
            records_from_value(&json!("rs1")),
            Err(ScoringError::InputShape(_))
        ));
        assert!(matches!(
            records_from_value(&json!([{}, 3])),
            Err(ScoringError::InputShape(msg)) if msg.starts_with("record 1")
        ));
    }

    #[test]
    fn test_evaluate_samples_requires_pair() {
        let provider = MockSimilarityProvider::new();
        let config = EvaluationConfig::default();
        for bad in [json!({}), json!([]), json!([{}]), json!([{}, {}, {}])] {
            assert!(matches!(
                evaluate_samples(TaskKind::Drug, &bad, &provider, &config),
                Err(ScoringError::InputShape(_))
            ));
        }
        let ok = evaluate_samples(
            TaskKind::Drug,
            &json!([{"Variant/Haplotypes": "rs1"}, [{"Variant/Haplotypes": "rs1"}]]),
            &provider,
            &config,
        )
        .unwrap();
        assert_eq!(ok.status, EvaluationStatus::Ok);
    }
}
