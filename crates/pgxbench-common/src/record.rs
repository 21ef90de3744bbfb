//! Annotation records as produced by curators and by the extraction pipeline.
//!
//! A record is a flat JSON object keyed by the curated column names
//! ("Variant/Haplotypes", "Drug(s)", ...). Values are mostly strings; counts and
//! statistics sometimes arrive as JSON numbers, and the term-normalisation step
//! attaches `*_normalized` objects carrying resolved identifiers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PgxError, Result};

/// Canonical field names shared by the annotation schemas.
pub mod fields {
    pub const VARIANT: &str = "Variant/Haplotypes";
    pub const VARIANT_NORMALIZED: &str = "Variant/Haplotypes_normalized";
    pub const GENE: &str = "Gene";
    pub const GENE_PRODUCT: &str = "Gene/gene product";
    pub const DRUGS: &str = "Drug(s)";
    pub const DRUGS_NORMALIZED: &str = "Drug(s)_normalized";
    pub const DRUG_OPERATOR: &str = "Multiple drugs And/or";
    pub const PMID: &str = "PMID";
    pub const PHENOTYPE: &str = "Phenotype";
    pub const PHENOTYPE_CATEGORY: &str = "Phenotype Category";
    pub const SIGNIFICANCE: &str = "Significance";
    pub const ALLELES: &str = "Alleles";
    pub const COMPARISON_ALLELES: &str = "Comparison Allele(s) or Genotype(s)";
    pub const COMPARISON_METABOLIZERS: &str = "Comparison Metabolizer types";
    pub const METABOLIZER_TYPES: &str = "Metabolizer types";
    pub const SPECIALTY_POPULATION: &str = "Specialty Population";
    pub const ASSOCIATION: &str = "Is/Is Not associated";
    pub const DIRECTION: &str = "Direction of effect";
    pub const PD_PK_TERMS: &str = "PD/PK terms";
    pub const IS_PLURAL: &str = "isPlural";
    pub const POPULATION_TYPES: &str = "Population types";
    pub const POPULATION_PHENOTYPES: &str = "Population Phenotypes or diseases";
    pub const PHENOTYPE_OPERATOR: &str = "Multiple phenotypes or diseases And/or";
    pub const TREATED_WITH: &str = "When treated with/exposed to/when assayed with";
    pub const FUNCTIONAL_TERMS: &str = "Functional terms";
    pub const ASSAY_TYPE: &str = "Assay type";
    pub const CELL_TYPE: &str = "Cell type";

    pub const STUDY_PARAMETERS_ID: &str = "Study Parameters ID";
    pub const VARIANT_ANNOTATION_ID: &str = "Variant Annotation ID";
    pub const STUDY_TYPE: &str = "Study Type";
    pub const STUDY_CASES: &str = "Study Cases";
    pub const STUDY_CONTROLS: &str = "Study Controls";
    pub const CHARACTERISTICS: &str = "Characteristics";
    pub const CHARACTERISTICS_TYPE: &str = "Characteristics Type";
    pub const FREQ_CASES: &str = "Frequency In Cases";
    pub const ALLELE_FREQ_CASES: &str = "Allele Of Frequency In Cases";
    pub const FREQ_CONTROLS: &str = "Frequency In Controls";
    pub const ALLELE_FREQ_CONTROLS: &str = "Allele Of Frequency In Controls";
    pub const P_VALUE: &str = "P Value";
    pub const RATIO_STAT_TYPE: &str = "Ratio Stat Type";
    pub const RATIO_STAT: &str = "Ratio Stat";
    pub const CI_START: &str = "Confidence Interval Start";
    pub const CI_STOP: &str = "Confidence Interval Stop";
    pub const BIOGEOGRAPHICAL_GROUPS: &str = "Biogeographical Groups";

    /// Marker set on records split out of a multi-variant annotation.
    pub const EXPANDED_MARKER: &str = "_expanded_from_multi_variant";
}

/// A single annotation record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationRecord(Map<String, Value>);

impl AnnotationRecord {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a record from an arbitrary JSON value. Only objects are records.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(PgxError::MalformedRecord(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Textual view of a field. Strings are returned verbatim, numbers and
    /// booleans are rendered; null, missing, arrays and objects are absent.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Like [`text`](Self::text) but treats the empty string as absent.
    pub fn non_empty(&self, field: &str) -> Option<String> {
        self.text(field).filter(|s| !s.is_empty())
    }

    /// Resolved variant identifier attached by term normalisation, if any.
    pub fn resolved_variant_id(&self) -> Option<String> {
        self.nested_id(fields::VARIANT_NORMALIZED, "variant_id")
    }

    /// Resolved drug identifier attached by term normalisation, if any.
    pub fn resolved_drug_id(&self) -> Option<String> {
        self.nested_id(fields::DRUGS_NORMALIZED, "drug_id")
    }

    fn nested_id(&self, field: &str, key: &str) -> Option<String> {
        let id = match self.0.get(field)?.get(key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!id.is_empty()).then_some(id)
    }

    /// Whether this record was produced by splitting a multi-variant annotation.
    pub fn is_expanded(&self) -> bool {
        matches!(self.0.get(fields::EXPANDED_MARKER), Some(Value::Bool(true)))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for AnnotationRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_renders_numbers_and_skips_null() {
        let rec = AnnotationRecord::from_value(json!({
            "Study Cases": 120,
            "Ratio Stat": 1.5,
            "Gene": null,
            "Drug(s)": "warfarin",
        }))
        .unwrap();
        assert_eq!(rec.text(fields::STUDY_CASES).as_deref(), Some("120"));
        assert_eq!(rec.text(fields::RATIO_STAT).as_deref(), Some("1.5"));
        assert_eq!(rec.text(fields::GENE), None);
        assert_eq!(rec.text("missing"), None);
        assert_eq!(rec.text(fields::DRUGS).as_deref(), Some("warfarin"));
    }

    #[test]
    fn test_resolved_ids() {
        let rec = AnnotationRecord::new()
            .with(fields::VARIANT_NORMALIZED, json!({"variant_id": " PA166154579 "}))
            .with(fields::DRUGS_NORMALIZED, json!({"drug_id": ""}));
        assert_eq!(rec.resolved_variant_id().as_deref(), Some("PA166154579"));
        assert_eq!(rec.resolved_drug_id(), None);
    }

    #[test]
    fn test_non_object_rejected() {
        let err = AnnotationRecord::from_value(json!(["a"])).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_transparent_serialization() {
        let rec = AnnotationRecord::new().with(fields::GENE, "CYP2C19");
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value, json!({"Gene": "CYP2C19"}));
    }
}
