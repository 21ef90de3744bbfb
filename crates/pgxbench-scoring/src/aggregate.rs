//! Per-pair scoring, dependency penalties, and dataset-level roll-up.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use pgxbench_common::{AnnotationRecord, EvaluationConfig};
use pgxbench_embed::SimilarityProvider;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::align::{align, AlignedPair, MatchTier};
use crate::evaluators::FieldScorer;
use crate::schema::{TaskKind, TaskSchema};
use crate::tokenize::expand_by_variant;
use crate::validate::{validate, AffectedFields, DependencyIssue};

// ── Result types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Ok,
    /// Ground truth or predictions were empty.
    MissingInput,
    /// Both sides had records but nothing aligned.
    NoOverlapAfterAlignment,
}

/// Raw values behind a field score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValues {
    pub ground_truth: Option<Value>,
    pub prediction: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenalizedField {
    pub original_score: f64,
    pub penalized_score: f64,
    pub penalty_percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PenaltyInfo {
    pub total_penalty: f64,
    pub penalized_fields: BTreeMap<String, PenalizedField>,
    pub issues_by_field: BTreeMap<String, Vec<String>>,
}

/// Scores for one aligned pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleResult {
    pub sample_id: usize,
    pub match_key: String,
    pub tier: MatchTier,
    /// Post-penalty scores; pre-penalty values are kept in `penalty_info`.
    pub field_scores: BTreeMap<String, f64>,
    pub field_values: BTreeMap<String, FieldValues>,
    pub dependency_issues: Vec<DependencyIssue>,
    pub penalty_info: PenaltyInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub mean_score: f64,
    pub scores: Vec<f64>,
}

/// Outcome of evaluating one task's predictions against its ground truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetResult {
    /// Aligned pairs plus unmatched ground-truth records.
    pub total_samples: usize,
    pub field_scores: BTreeMap<String, FieldSummary>,
    pub overall_score: f64,
    pub detailed_results: Vec<SampleResult>,
    pub aligned_variants: Vec<String>,
    pub unmatched_ground_truth: Vec<AnnotationRecord>,
    pub unmatched_predictions: Vec<AnnotationRecord>,
    pub status: EvaluationStatus,
}

impl DatasetResult {
    fn degenerate(
        status: EvaluationStatus,
        unmatched_ground_truth: Vec<AnnotationRecord>,
        unmatched_predictions: Vec<AnnotationRecord>,
    ) -> Self {
        Self {
            total_samples: unmatched_ground_truth.len(),
            field_scores: BTreeMap::new(),
            overall_score: 0.0,
            detailed_results: Vec::new(),
            aligned_variants: Vec::new(),
            unmatched_ground_truth,
            unmatched_predictions,
            status,
        }
    }
}

// ── Evaluator ────────────────────────────────────────────────────────────────

/// Evaluates one task: expand, align, score, penalise, aggregate.
pub struct TaskEvaluator<'a> {
    schema: TaskSchema,
    provider: &'a dyn SimilarityProvider,
    config: &'a EvaluationConfig,
    weights: Option<HashMap<String, f64>>,
    related: &'a [AnnotationRecord],
}

impl<'a> TaskEvaluator<'a> {
    pub fn new(
        kind: TaskKind,
        provider: &'a dyn SimilarityProvider,
        config: &'a EvaluationConfig,
    ) -> Self {
        Self {
            schema: TaskSchema::for_task(kind),
            provider,
            config,
            weights: config.task_weights(kind.key()).cloned(),
            related: &[],
        }
    }

    /// Field weights for this call. Replaces any table from the configuration.
    pub fn with_weights(mut self, weights: HashMap<String, f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Records used for cross-reference dependency checks.
    pub fn with_related(mut self, related: &'a [AnnotationRecord]) -> Self {
        self.related = related;
        self
    }

    pub fn schema(&self) -> &TaskSchema {
        &self.schema
    }

    pub fn evaluate(&self, gt: &[AnnotationRecord], pred: &[AnnotationRecord]) -> DatasetResult {
        let kind = self.schema.kind;
        let gt = expand_by_variant(gt);
        let pred = expand_by_variant(pred);
        if gt.is_empty() || pred.is_empty() {
            debug!("{kind}: missing input ({} gt, {} pred)", gt.len(), pred.len());
            return DatasetResult::degenerate(EvaluationStatus::MissingInput, gt, pred);
        }

        let alignment = align(&gt, &pred, &self.schema, self.config);

        if alignment.pairs.is_empty() {
            info!("{kind}: no overlap after alignment");
            return DatasetResult::degenerate(
                EvaluationStatus::NoOverlapAfterAlignment,
                alignment.unmatched_gt,
                alignment.unmatched_pred,
            );
        }

        let detailed_results: Vec<SampleResult> = alignment
            .pairs
            .iter()
            .enumerate()
            .map(|(i, pair)| self.score_pair(i, pair))
            .collect();

        let unmatched = alignment.unmatched_gt.len();
        let mut field_scores = BTreeMap::new();
        for spec in self.schema.aggregated_fields() {
            let mut scores: Vec<f64> = detailed_results
                .iter()
                .map(|s| s.field_scores.get(spec.name).copied().unwrap_or(0.0))
                .collect();
            scores.extend(std::iter::repeat_n(0.0, unmatched));
            let mean_score = scores.iter().sum::<f64>() / scores.len() as f64;
            field_scores.insert(spec.name.to_string(), FieldSummary { mean_score, scores });
        }

        let overall_score = self.overall(&field_scores);
        info!(
            "{kind}: overall {:.3} over {} aligned + {} unmatched ground truth",
            overall_score,
            detailed_results.len(),
            unmatched
        );

        DatasetResult {
            total_samples: detailed_results.len() + unmatched,
            field_scores,
            overall_score,
            aligned_variants: alignment.match_keys(),
            detailed_results,
            unmatched_ground_truth: alignment.unmatched_gt,
            unmatched_predictions: alignment.unmatched_pred,
            status: EvaluationStatus::Ok,
        }
    }

    fn score_pair(&self, sample_id: usize, pair: &AlignedPair) -> SampleResult {
        let scorer = FieldScorer::new(self.provider, self.config);
        let mut field_scores = BTreeMap::new();
        let mut field_values = BTreeMap::new();
        for spec in &self.schema.fields {
            let score = scorer.score(spec.evaluator, spec.name, &pair.gt, &pair.pred);
            field_scores.insert(spec.name.to_string(), score);
            field_values.insert(
                spec.name.to_string(),
                FieldValues {
                    ground_truth: pair.gt.get(spec.name).cloned(),
                    prediction: pair.pred.get(spec.name).cloned(),
                },
            );
        }

        let dependency_issues = validate(&pair.pred, self.related);
        let penalty_info = self.apply_penalties(&mut field_scores, &dependency_issues);

        SampleResult {
            sample_id,
            match_key: pair.match_key.clone(),
            tier: pair.tier,
            field_scores,
            field_values,
            dependency_issues,
            penalty_info,
        }
    }

    /// Discount every field touched by an issue by the record's total penalty.
    fn apply_penalties(
        &self,
        field_scores: &mut BTreeMap<String, f64>,
        issues: &[DependencyIssue],
    ) -> PenaltyInfo {
        let mut info = PenaltyInfo::default();
        if issues.is_empty() {
            return info;
        }
        let total = self.config.penalty.total(issues.len());
        info.total_penalty = total;

        let mut affected: BTreeSet<String> = BTreeSet::new();
        for issue in issues {
            let names: Vec<String> = match issue.kind.affected_fields() {
                AffectedFields::Only(names) => names.iter().map(|n| n.to_string()).collect(),
                AffectedFields::All => field_scores.keys().cloned().collect(),
            };
            for name in names {
                info.issues_by_field
                    .entry(name.clone())
                    .or_default()
                    .push(issue.message.clone());
                affected.insert(name);
            }
        }

        for name in affected {
            if let Some(score) = field_scores.get_mut(&name) {
                let original_score = *score;
                *score = original_score * (1.0 - total);
                info.penalized_fields.insert(
                    name,
                    PenalizedField {
                        original_score,
                        penalized_score: *score,
                        penalty_percentage: total * 100.0,
                    },
                );
            }
        }
        info
    }

    fn overall(&self, field_scores: &BTreeMap<String, FieldSummary>) -> f64 {
        let (weighted, total) = field_scores.iter().fold((0.0, 0.0), |(sum, total), (field, s)| {
            let w = self.schema.weight(field, self.weights.as_ref());
            (sum + w * s.mean_score, total + w)
        });
        if total > 0.0 {
            weighted / total
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgxbench_common::fields::*;
    use pgxbench_embed::MockSimilarityProvider;

    fn pheno(variant: &str) -> AnnotationRecord {
        AnnotationRecord::new()
            .with(VARIANT, variant)
            .with(GENE, "CYP2C19")
            .with(DRUGS, "clopidogrel")
            .with(PHENOTYPE, "reduced response")
            .with(ASSOCIATION, "Associated with")
            .with(DIRECTION, "decreased")
    }

    #[test]
    fn test_missing_input_status() {
        let provider = MockSimilarityProvider::new();
        let config = EvaluationConfig::default();
        let evaluator = TaskEvaluator::new(TaskKind::Phenotype, &provider, &config);

        let both = evaluator.evaluate(&[], &[]);
        assert_eq!(both.status, EvaluationStatus::MissingInput);
        assert_eq!(both.overall_score, 0.0);
        assert!(both.field_scores.is_empty());

        let one = evaluator.evaluate(&[pheno("rs1")], &[]);
        assert_eq!(one.status, EvaluationStatus::MissingInput);
        assert_eq!(one.unmatched_ground_truth.len(), 1);
        assert_eq!(one.total_samples, 1);
    }

    #[test]
    fn test_missing_input_counts_expanded_ground_truth() {
        let provider = MockSimilarityProvider::new();
        let config = EvaluationConfig::default();
        let evaluator = TaskEvaluator::new(TaskKind::Phenotype, &provider, &config);

        let result = evaluator.evaluate(&[pheno("rs1801133, rs1801131")], &[]);
        assert_eq!(result.status, EvaluationStatus::MissingInput);
        assert_eq!(result.total_samples, 2);
        assert!(result.unmatched_ground_truth.iter().all(|r| r.is_expanded()));
    }

    #[test]
    fn test_unlinked_annotation_id_penalises_functional_analysis() {
        let provider = MockSimilarityProvider::new();
        let config = EvaluationConfig::default();
        let fa = AnnotationRecord::new()
            .with(VARIANT, "rs4244285")
            .with(GENE, "CYP2C19")
            .with(VARIANT_ANNOTATION_ID, "1449");
        let related = vec![AnnotationRecord::new().with(VARIANT_ANNOTATION_ID, "2000")];

        let result = TaskEvaluator::new(TaskKind::FunctionalAnalysis, &provider, &config)
            .with_related(&related)
            .evaluate(std::slice::from_ref(&fa), std::slice::from_ref(&fa));
        let sample = &result.detailed_results[0];

        assert_eq!(sample.dependency_issues.len(), 1);
        assert!(!sample.penalty_info.penalized_fields.is_empty());
        assert!((sample.field_scores[VARIANT] - 0.95).abs() < 1e-12);
        assert!((sample.field_scores[COMPARISON_ALLELES] - 0.95).abs() < 1e-12);
        assert_eq!(sample.field_scores[GENE], 1.0);
        assert!(result.overall_score < 1.0);
    }

    #[test]
    fn test_no_overlap_status() {
        let provider = MockSimilarityProvider::new();
        let config = EvaluationConfig::default();
        let evaluator = TaskEvaluator::new(TaskKind::Drug, &provider, &config);

        let result = evaluator.evaluate(&[pheno("rs1")], &[pheno("rs2")]);
        assert_eq!(result.status, EvaluationStatus::NoOverlapAfterAlignment);
        assert_eq!(result.overall_score, 0.0);
        assert_eq!(result.unmatched_predictions.len(), 1);
    }

    #[test]
    fn test_perfect_match_scores_one() {
        let provider = MockSimilarityProvider::new();
        let config = EvaluationConfig::default();
        let evaluator = TaskEvaluator::new(TaskKind::Phenotype, &provider, &config);

        let result = evaluator.evaluate(&[pheno("rs4244285")], &[pheno("rs4244285")]);
        assert_eq!(result.status, EvaluationStatus::Ok);
        assert_eq!(result.total_samples, 1);
        assert!((result.overall_score - 1.0).abs() < 1e-12);
        assert_eq!(result.aligned_variants, vec!["rs4244285"]);
        assert_eq!(result.detailed_results[0].penalty_info, PenaltyInfo::default());
    }

    #[test]
    fn test_direction_issue_penalises_mapped_fields_only() {
        let provider = MockSimilarityProvider::new();
        let config = EvaluationConfig::default();
        let evaluator = TaskEvaluator::new(TaskKind::Phenotype, &provider, &config);

        let gt = pheno("rs4244285").with(ASSOCIATION, "Not associated with");
        let pred = gt.clone();
        let result = evaluator.evaluate(&[gt], &[pred]);
        let sample = &result.detailed_results[0];

        assert_eq!(sample.dependency_issues.len(), 1);
        assert!((sample.penalty_info.total_penalty - 0.05).abs() < 1e-12);
        assert!((sample.field_scores[DIRECTION] - 0.95).abs() < 1e-12);
        assert!((sample.field_scores[ASSOCIATION] - 0.95).abs() < 1e-12);
        assert_eq!(sample.field_scores[PHENOTYPE], 1.0);
        assert_eq!(sample.penalty_info.penalized_fields.len(), 2);
        assert_eq!(
            sample.penalty_info.penalized_fields[DIRECTION].original_score,
            1.0
        );
    }

    #[test]
    fn test_weights_override_schema_defaults() {
        let provider = MockSimilarityProvider::new();
        let config = EvaluationConfig::default();
        let gt = pheno("rs4244285");
        let pred = pheno("rs4244285").with(PHENOTYPE_CATEGORY, "Efficacy");

        // only Phenotype Category differs (0.0); give it all the weight
        let weights: HashMap<String, f64> = TaskSchema::for_task(TaskKind::Phenotype)
            .fields
            .iter()
            .map(|f| (f.name.to_string(), if f.name == PHENOTYPE_CATEGORY { 1.0 } else { 0.0 }))
            .collect();
        let result = TaskEvaluator::new(TaskKind::Phenotype, &provider, &config)
            .with_weights(weights)
            .evaluate(&[gt], &[pred]);
        assert_eq!(result.overall_score, 0.0);
    }
}
