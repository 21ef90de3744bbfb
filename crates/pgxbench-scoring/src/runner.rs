//! Benchmarking extraction output for whole documents and document sets.
//!
//! Ground truth is a JSON object keyed by document id (PMCID), each value
//! holding the four annotation lists. A `_metadata` entry, if present, is
//! ignored.

use std::collections::BTreeMap;
use std::path::Path;

use pgxbench_common::{AnnotationRecord, EvaluationConfig};
use pgxbench_embed::SharedSimilarity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::aggregate::{DatasetResult, TaskEvaluator};
use crate::error::{Result, ScoringError};
use crate::schema::TaskKind;
use crate::tokenize::expand_by_variant;

const METADATA_KEY: &str = "_metadata";

/// All annotations for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentAnnotations {
    #[serde(default)]
    pub var_pheno_ann: Vec<AnnotationRecord>,
    #[serde(default)]
    pub var_drug_ann: Vec<AnnotationRecord>,
    #[serde(default)]
    pub var_fa_ann: Vec<AnnotationRecord>,
    #[serde(default)]
    pub study_parameters: Vec<AnnotationRecord>,
}

impl DocumentAnnotations {
    pub fn task(&self, kind: TaskKind) -> &[AnnotationRecord] {
        match kind {
            TaskKind::Phenotype => &self.var_pheno_ann,
            TaskKind::Drug => &self.var_drug_ann,
            TaskKind::FunctionalAnalysis => &self.var_fa_ann,
            TaskKind::StudyParameters => &self.study_parameters,
        }
    }

    pub fn task_mut(&mut self, kind: TaskKind) -> &mut Vec<AnnotationRecord> {
        match kind {
            TaskKind::Phenotype => &mut self.var_pheno_ann,
            TaskKind::Drug => &mut self.var_drug_ann,
            TaskKind::FunctionalAnalysis => &mut self.var_fa_ann,
            TaskKind::StudyParameters => &mut self.study_parameters,
        }
    }
}

// ── Ground truth ─────────────────────────────────────────────────────────────

/// Curated annotations keyed by document id. Loaded once, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct GroundTruth {
    documents: BTreeMap<String, DocumentAnnotations>,
}

impl GroundTruth {
    pub fn new(documents: BTreeMap<String, DocumentAnnotations>) -> Self {
        Self { documents }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ground_truth = Self::from_json_str(&content)?;
        info!(
            "Loaded ground truth for {} documents from {}",
            ground_truth.len(),
            path.as_ref().display()
        );
        Ok(ground_truth)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let mut map = match serde_json::from_str::<Value>(content)? {
            Value::Object(map) => map,
            _ => {
                return Err(ScoringError::InputShape(
                    "ground truth must be a JSON object keyed by document id".to_string(),
                ))
            }
        };
        map.remove(METADATA_KEY);

        let mut documents = BTreeMap::new();
        for (id, value) in map {
            documents.insert(id, serde_json::from_value(value)?);
        }
        Ok(Self { documents })
    }

    pub fn get(&self, document_id: &str) -> Option<&DocumentAnnotations> {
        self.documents.get(document_id)
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.documents.contains_key(document_id)
    }

    pub fn document_ids(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

// ── Reports ──────────────────────────────────────────────────────────────────

/// Score for one task of one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub overall_score: f64,
    pub total_samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DatasetResult>,
}

impl TaskOutcome {
    fn scored(result: DatasetResult) -> Self {
        Self {
            overall_score: result.overall_score,
            total_samples: result.total_samples,
            error: None,
            result: Some(result),
        }
    }

    /// Ground truth exists but nothing was predicted. Every expanded
    /// ground-truth record still counts as a sample.
    fn empty_predictions(ground_truth_count: usize) -> Self {
        Self {
            overall_score: 0.0,
            total_samples: ground_truth_count,
            error: Some("Empty predictions list".to_string()),
            result: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentReport {
    pub document_id: String,
    /// Only tasks with ground truth are present.
    pub tasks: BTreeMap<TaskKind, TaskOutcome>,
}

impl DocumentReport {
    /// Unweighted mean of the task scores.
    pub fn combined_score(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        self.tasks.values().map(|t| t.overall_score).sum::<f64>() / self.tasks.len() as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BenchmarkSummary {
    pub documents: BTreeMap<String, DocumentReport>,
    /// Documents submitted without ground truth.
    pub skipped: Vec<String>,
    pub task_averages: BTreeMap<TaskKind, f64>,
    pub task_samples: BTreeMap<TaskKind, usize>,
    /// Task averages weighted by their sample counts.
    pub overall_score: f64,
}

// ── Runner ───────────────────────────────────────────────────────────────────

pub struct BenchmarkRunner {
    ground_truth: GroundTruth,
    provider: SharedSimilarity,
    config: EvaluationConfig,
}

impl BenchmarkRunner {
    pub fn new(ground_truth: GroundTruth, provider: SharedSimilarity) -> Self {
        Self {
            ground_truth,
            provider,
            config: EvaluationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EvaluationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ground_truth(&self) -> &GroundTruth {
        &self.ground_truth
    }

    /// Score every task that has ground truth for `document_id`.
    pub fn benchmark_document(
        &self,
        document_id: &str,
        predictions: &DocumentAnnotations,
    ) -> Result<DocumentReport> {
        let gt = self
            .ground_truth
            .get(document_id)
            .ok_or_else(|| ScoringError::MissingGroundTruth(document_id.to_string()))?;

        let mut tasks = BTreeMap::new();
        for kind in TaskKind::ALL {
            let gt_records = gt.task(kind);
            if gt_records.is_empty() {
                continue;
            }
            let pred_records = predictions.task(kind);
            if pred_records.is_empty() {
                warn!("{document_id}/{kind}: empty predictions list");
                let samples = expand_by_variant(gt_records).len();
                tasks.insert(kind, TaskOutcome::empty_predictions(samples));
                continue;
            }

            let mut evaluator = TaskEvaluator::new(kind, self.provider.as_ref(), &self.config);
            if kind == TaskKind::FunctionalAnalysis {
                evaluator = evaluator.with_related(&predictions.study_parameters);
            }
            let result = evaluator.evaluate(gt_records, pred_records);
            info!("{document_id}/{kind}: score {:.3}", result.overall_score);
            tasks.insert(kind, TaskOutcome::scored(result));
        }

        Ok(DocumentReport {
            document_id: document_id.to_string(),
            tasks,
        })
    }

    /// Score a set of documents and roll task scores up across them.
    pub fn benchmark_multiple(
        &self,
        outputs: &BTreeMap<String, DocumentAnnotations>,
    ) -> BenchmarkSummary {
        let mut summary = BenchmarkSummary::default();
        for (id, report) in self.run_documents(outputs) {
            match report {
                Ok(report) => {
                    summary.documents.insert(id, report);
                }
                Err(e) => {
                    warn!("Skipping {id}: {e}");
                    summary.skipped.push(id);
                }
            }
        }

        let mut sums: BTreeMap<TaskKind, (f64, usize)> = BTreeMap::new();
        for report in summary.documents.values() {
            for (kind, outcome) in &report.tasks {
                let entry = sums.entry(*kind).or_insert((0.0, 0));
                entry.0 += outcome.overall_score;
                entry.1 += 1;
                *summary.task_samples.entry(*kind).or_insert(0) += outcome.total_samples;
            }
        }
        summary.task_averages = sums
            .into_iter()
            .map(|(kind, (sum, n))| (kind, sum / n as f64))
            .collect();

        let (weighted, samples) = summary.task_averages.iter().fold(
            (0.0, 0usize),
            |(weighted, samples), (kind, avg)| {
                let n = summary.task_samples.get(kind).copied().unwrap_or(0);
                (weighted + avg * n as f64, samples + n)
            },
        );
        summary.overall_score = if samples > 0 {
            weighted / samples as f64
        } else {
            0.0
        };

        info!(
            "Benchmarked {} documents ({} skipped), overall {:.3}",
            summary.documents.len(),
            summary.skipped.len(),
            summary.overall_score
        );
        summary
    }

    fn run_documents(
        &self,
        outputs: &BTreeMap<String, DocumentAnnotations>,
    ) -> Vec<(String, Result<DocumentReport>)> {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            outputs
                .par_iter()
                .map(|(id, predictions)| (id.clone(), self.benchmark_document(id, predictions)))
                .collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            outputs
                .iter()
                .map(|(id, predictions)| (id.clone(), self.benchmark_document(id, predictions)))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgxbench_common::fields::*;
    use pgxbench_embed::MockSimilarityProvider;
    use std::sync::Arc;

    fn runner(json: &str) -> BenchmarkRunner {
        let gt = GroundTruth::from_json_str(json).unwrap();
        BenchmarkRunner::new(gt, Arc::new(MockSimilarityProvider::new()))
    }

    fn drug(variant: &str) -> AnnotationRecord {
        AnnotationRecord::new()
            .with(VARIANT, variant)
            .with(DRUGS, "warfarin")
    }

    const GT: &str = r#"{
        "_metadata": {"version": 3},
        "PMC1": {
            "var_drug_ann": [
                {"Variant/Haplotypes": "rs9923231", "Drug(s)": "warfarin"},
                {"Variant/Haplotypes": "rs1057910", "Drug(s)": "warfarin"}
            ],
            "study_parameters": [{"Study Type": "cohort"}]
        },
        "PMC2": {
            "var_drug_ann": [{"Variant/Haplotypes": "rs4244285", "Drug(s)": "warfarin"}]
        }
    }"#;

    #[test]
    fn test_metadata_is_dropped() {
        let gt = GroundTruth::from_json_str(GT).unwrap();
        assert_eq!(gt.document_ids().collect::<Vec<_>>(), vec!["PMC1", "PMC2"]);
        assert_eq!(gt.get("PMC1").unwrap().var_drug_ann.len(), 2);
        assert!(gt.get("PMC1").unwrap().var_pheno_ann.is_empty());
    }

    #[test]
    fn test_ground_truth_must_be_object() {
        assert!(matches!(
            GroundTruth::from_json_str("[1, 2]"),
            Err(ScoringError::InputShape(_))
        ));
        assert!(matches!(
            GroundTruth::from_json_str("{not json"),
            Err(ScoringError::Json(_))
        ));
    }

    #[test]
    fn test_unknown_document() {
        let runner = runner(GT);
        let err = runner
            .benchmark_document("PMC404", &DocumentAnnotations::default())
            .unwrap_err();
        assert!(matches!(err, ScoringError::MissingGroundTruth(id) if id == "PMC404"));
    }

    #[test]
    fn test_document_tasks_and_empty_predictions() {
        let runner = runner(GT);
        let predictions = DocumentAnnotations {
            var_drug_ann: vec![drug("rs9923231")],
            // predicted phenotypes are ignored: no ground truth for that task
            var_pheno_ann: vec![drug("rs1")],
            ..Default::default()
        };
        let report = runner.benchmark_document("PMC1", &predictions).unwrap();

        assert_eq!(
            report.tasks.keys().copied().collect::<Vec<_>>(),
            vec![TaskKind::Drug, TaskKind::StudyParameters]
        );
        let sp = &report.tasks[&TaskKind::StudyParameters];
        assert_eq!(sp.error.as_deref(), Some("Empty predictions list"));
        assert_eq!(sp.overall_score, 0.0);

        let drug_outcome = &report.tasks[&TaskKind::Drug];
        assert_eq!(drug_outcome.total_samples, 2);
        assert!(drug_outcome.overall_score > 0.0 && drug_outcome.overall_score < 1.0);
        assert!((report.combined_score() - drug_outcome.overall_score / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_predictions_count_expanded_records() {
        let runner = runner(
            r#"{"PMC3": {"var_drug_ann": [
                {"Variant/Haplotypes": "rs1801133, rs1801131", "Drug(s)": "methotrexate"}
            ]}}"#,
        );
        let report = runner
            .benchmark_document("PMC3", &DocumentAnnotations::default())
            .unwrap();
        assert_eq!(report.tasks[&TaskKind::Drug].total_samples, 2);
    }

    #[test]
    fn test_multiple_documents_weighted_by_samples() {
        let runner = runner(GT);
        let outputs = BTreeMap::from([
            (
                "PMC1".to_string(),
                DocumentAnnotations {
                    var_drug_ann: vec![drug("rs9923231"), drug("rs1057910")],
                    study_parameters: vec![AnnotationRecord::new().with(STUDY_TYPE, "cohort")],
                    ..Default::default()
                },
            ),
            (
                "PMC2".to_string(),
                DocumentAnnotations {
                    var_drug_ann: vec![drug("rs4244285")],
                    ..Default::default()
                },
            ),
            ("PMC999".to_string(), DocumentAnnotations::default()),
        ]);
        let summary = runner.benchmark_multiple(&outputs);

        assert_eq!(summary.skipped, vec!["PMC999".to_string()]);
        assert!((summary.task_averages[&TaskKind::Drug] - 1.0).abs() < 1e-12);
        assert_eq!(summary.task_samples[&TaskKind::Drug], 3);
        assert_eq!(summary.task_samples[&TaskKind::StudyParameters], 1);
        assert!((summary.overall_score - 1.0).abs() < 1e-12);
    }
}
