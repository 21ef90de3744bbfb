//! Task schemas: which fields each annotation type is scored on, how, and
//! with what weight.

use std::collections::HashMap;
use std::fmt;

use pgxbench_common::fields::*;
use pgxbench_common::AnnotationRecord;
use serde::{Deserialize, Serialize};

use crate::evaluators::Evaluator;

/// Annotation types produced by the extraction pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "var_pheno_ann")]
    Phenotype,
    #[serde(rename = "var_drug_ann")]
    Drug,
    #[serde(rename = "var_fa_ann")]
    FunctionalAnalysis,
    #[serde(rename = "study_parameters")]
    StudyParameters,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Phenotype,
        TaskKind::Drug,
        TaskKind::FunctionalAnalysis,
        TaskKind::StudyParameters,
    ];

    /// Key used in annotation documents and weight tables.
    pub fn key(&self) -> &'static str {
        match self {
            TaskKind::Phenotype => "var_pheno_ann",
            TaskKind::Drug => "var_drug_ann",
            TaskKind::FunctionalAnalysis => "var_fa_ann",
            TaskKind::StudyParameters => "study_parameters",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.key() == key)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One scored field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub evaluator: Evaluator,
    pub weight: f64,
    /// Whether the field contributes to dataset-level scores. Identifier
    /// fields are scored per sample for inspection only.
    pub aggregated: bool,
}

impl FieldSpec {
    const fn new(name: &'static str, evaluator: Evaluator, weight: f64) -> Self {
        Self {
            name,
            evaluator,
            weight,
            aggregated: true,
        }
    }

    const fn identifier(name: &'static str) -> Self {
        Self {
            name,
            evaluator: Evaluator::Exact,
            weight: 1.0,
            aggregated: false,
        }
    }
}

/// Field set and alignment options for one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSchema {
    pub kind: TaskKind,
    pub fields: Vec<FieldSpec>,
    /// Align leftover records on equal Gene + drug set.
    pub entity_pair_fallback: bool,
    /// Align leftover records greedily by lexical field similarity.
    pub similarity_fallback: bool,
}

impl TaskSchema {
    pub fn for_task(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Phenotype => Self::phenotype(),
            TaskKind::Drug => Self::drug(),
            TaskKind::FunctionalAnalysis => Self::functional_analysis(),
            TaskKind::StudyParameters => Self::study_parameters(),
        }
    }

    fn phenotype() -> Self {
        use Evaluator::*;
        Self {
            kind: TaskKind::Phenotype,
            fields: vec![
                FieldSpec::new(VARIANT, SubstringContainment, 1.0),
                FieldSpec::new(GENE, Semantic, 1.0),
                FieldSpec::new(DRUGS, DrugCoverage, 1.5),
                FieldSpec::new(PHENOTYPE_CATEGORY, Categorical, 0.5),
                FieldSpec::new(ALLELES, SetCoverage, 1.5),
                FieldSpec::new(ASSOCIATION, Categorical, 1.0),
                FieldSpec::new(DIRECTION, Categorical, 2.0),
                FieldSpec::new(PHENOTYPE, Semantic, 2.0),
                FieldSpec::new(TREATED_WITH, Categorical, 0.5),
                FieldSpec::new(COMPARISON_ALLELES, SetCoverage, 1.0),
            ],
            entity_pair_fallback: true,
            similarity_fallback: false,
        }
    }

    fn drug() -> Self {
        use Evaluator::*;
        Self {
            kind: TaskKind::Drug,
            fields: vec![
                FieldSpec::new(VARIANT, SubstringContainment, 1.0),
                FieldSpec::new(GENE, Semantic, 1.0),
                FieldSpec::new(DRUGS, DrugCoverage, 1.0),
                FieldSpec::new(PMID, Exact, 1.0),
                FieldSpec::new(PHENOTYPE_CATEGORY, Categorical, 1.0),
                FieldSpec::new(SIGNIFICANCE, Categorical, 1.0),
                FieldSpec::new(ALLELES, SetCoverage, 1.0),
                FieldSpec::new(SPECIALTY_POPULATION, Semantic, 1.0),
                FieldSpec::new(METABOLIZER_TYPES, Semantic, 1.0),
                FieldSpec::new(IS_PLURAL, Categorical, 1.0),
                FieldSpec::new(ASSOCIATION, Categorical, 1.0),
                FieldSpec::new(DIRECTION, Categorical, 1.0),
                FieldSpec::new(PD_PK_TERMS, Semantic, 1.0),
                FieldSpec::new(DRUG_OPERATOR, Categorical, 1.0),
                FieldSpec::new(POPULATION_TYPES, Semantic, 1.0),
                FieldSpec::new(POPULATION_PHENOTYPES, Semantic, 1.0),
                FieldSpec::new(PHENOTYPE_OPERATOR, Categorical, 1.0),
                FieldSpec::new(COMPARISON_ALLELES, SetCoverage, 1.0),
                FieldSpec::new(COMPARISON_METABOLIZERS, Semantic, 1.0),
            ],
            entity_pair_fallback: false,
            similarity_fallback: false,
        }
    }

    fn functional_analysis() -> Self {
        use Evaluator::*;
        Self {
            kind: TaskKind::FunctionalAnalysis,
            fields: vec![
                FieldSpec::new(VARIANT, SubstringContainment, 1.0),
                FieldSpec::new(GENE, Semantic, 1.0),
                FieldSpec::new(DRUGS, DrugCoverage, 1.0),
                FieldSpec::new(PMID, Exact, 1.0),
                FieldSpec::new(PHENOTYPE_CATEGORY, Exact, 1.0),
                FieldSpec::new(SIGNIFICANCE, Exact, 1.0),
                FieldSpec::new(ALLELES, SetCoverage, 1.0),
                FieldSpec::new(SPECIALTY_POPULATION, Semantic, 1.0),
                FieldSpec::new(ASSAY_TYPE, Semantic, 1.0),
                FieldSpec::new(METABOLIZER_TYPES, Semantic, 1.0),
                FieldSpec::new(IS_PLURAL, Exact, 1.0),
                FieldSpec::new(ASSOCIATION, Exact, 1.0),
                FieldSpec::new(DIRECTION, Exact, 1.0),
                FieldSpec::new(FUNCTIONAL_TERMS, Semantic, 1.0),
                FieldSpec::new(GENE_PRODUCT, Semantic, 1.0),
                FieldSpec::new(TREATED_WITH, Exact, 1.0),
                FieldSpec::new(DRUG_OPERATOR, Exact, 1.0),
                FieldSpec::new(CELL_TYPE, Semantic, 1.0),
                FieldSpec::new(COMPARISON_ALLELES, SetCoverage, 1.0),
                FieldSpec::new(COMPARISON_METABOLIZERS, Semantic, 1.0),
            ],
            entity_pair_fallback: false,
            similarity_fallback: false,
        }
    }

    fn study_parameters() -> Self {
        use Evaluator::*;
        Self {
            kind: TaskKind::StudyParameters,
            fields: vec![
                FieldSpec::identifier(STUDY_PARAMETERS_ID),
                FieldSpec::identifier(VARIANT_ANNOTATION_ID),
                FieldSpec::new(STUDY_TYPE, Categorical, 1.0),
                FieldSpec::new(STUDY_CASES, NumericTolerance, 1.0),
                FieldSpec::new(STUDY_CONTROLS, NumericTolerance, 1.0),
                FieldSpec::new(CHARACTERISTICS, Semantic, 1.0),
                FieldSpec::new(CHARACTERISTICS_TYPE, Categorical, 1.0),
                FieldSpec::new(FREQ_CASES, NumericTolerance, 1.0),
                FieldSpec::new(ALLELE_FREQ_CASES, Semantic, 1.0),
                FieldSpec::new(FREQ_CONTROLS, NumericTolerance, 1.0),
                FieldSpec::new(ALLELE_FREQ_CONTROLS, Semantic, 1.0),
                FieldSpec::new(P_VALUE, PValue, 1.0),
                FieldSpec::new(RATIO_STAT_TYPE, Categorical, 1.0),
                FieldSpec::new(RATIO_STAT, NumericTolerance, 1.0),
                FieldSpec::new(CI_START, NumericTolerance, 1.0),
                FieldSpec::new(CI_STOP, NumericTolerance, 1.0),
                FieldSpec::new(BIOGEOGRAPHICAL_GROUPS, Categorical, 1.0),
            ],
            entity_pair_fallback: false,
            similarity_fallback: true,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn aggregated_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.aggregated)
    }

    /// Schema default weight, overridden by the caller's table when present.
    /// Fields unknown to both default to 1.0.
    pub fn weight(&self, field: &str, overrides: Option<&HashMap<String, f64>>) -> f64 {
        overrides
            .and_then(|w| w.get(field).copied())
            .or_else(|| self.field(field).map(|f| f.weight))
            .unwrap_or(1.0)
    }

    /// Pre-resolved identifier used by the first alignment tier.
    ///
    /// Study parameters carry their link to a variant annotation directly;
    /// other tasks rely on the term-normalisation output.
    pub fn resolved_id(&self, record: &AnnotationRecord) -> Option<String> {
        match self.kind {
            TaskKind::StudyParameters => record
                .non_empty(VARIANT_ANNOTATION_ID)
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            _ => record.resolved_variant_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_keys_round_trip() {
        for kind in TaskKind::ALL {
            assert_eq!(TaskKind::from_key(kind.key()), Some(kind));
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.key()));
        }
        assert_eq!(TaskKind::from_key("var_unknown"), None);
    }

    #[test]
    fn test_phenotype_weights() {
        let schema = TaskSchema::for_task(TaskKind::Phenotype);
        assert_eq!(schema.fields.len(), 10);
        assert_eq!(schema.weight(PHENOTYPE, None), 2.0);
        assert_eq!(schema.weight(PHENOTYPE_CATEGORY, None), 0.5);
        assert_eq!(schema.weight("Not a field", None), 1.0);

        let overrides = HashMap::from([(PHENOTYPE.to_string(), 3.0)]);
        assert_eq!(schema.weight(PHENOTYPE, Some(&overrides)), 3.0);
        assert_eq!(schema.weight(GENE, Some(&overrides)), 1.0);
    }

    #[test]
    fn test_study_parameter_ids_not_aggregated() {
        let schema = TaskSchema::for_task(TaskKind::StudyParameters);
        let aggregated: Vec<_> = schema.aggregated_fields().map(|f| f.name).collect();
        assert!(!aggregated.contains(&STUDY_PARAMETERS_ID));
        assert!(!aggregated.contains(&VARIANT_ANNOTATION_ID));
        assert_eq!(aggregated.len(), schema.fields.len() - 2);
        assert_eq!(schema.field(P_VALUE).map(|f| f.evaluator), Some(Evaluator::PValue));
    }

    #[test]
    fn test_drug_fields_use_drug_coverage() {
        for kind in [TaskKind::Phenotype, TaskKind::Drug, TaskKind::FunctionalAnalysis] {
            let schema = TaskSchema::for_task(kind);
            assert_eq!(
                schema.field(DRUGS).map(|f| f.evaluator),
                Some(Evaluator::DrugCoverage),
                "{kind}"
            );
        }
    }

    #[test]
    fn test_resolved_id_source() {
        let record = AnnotationRecord::new()
            .with(VARIANT_ANNOTATION_ID, " 1449192282 ")
            .with(VARIANT_NORMALIZED, json!({"variant_id": "PA166"}));
        let sp = TaskSchema::for_task(TaskKind::StudyParameters);
        let pheno = TaskSchema::for_task(TaskKind::Phenotype);
        assert_eq!(sp.resolved_id(&record).as_deref(), Some("1449192282"));
        assert_eq!(pheno.resolved_id(&record).as_deref(), Some("PA166"));
    }
}
