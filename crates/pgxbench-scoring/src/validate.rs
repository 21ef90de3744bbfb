//! Cross-field consistency checks on predicted records.
//!
//! Validation is a pure function of one record and, optionally, the records it
//! should link to (for functional-analysis annotations, the predicted study
//! parameters). Each rule only fires when the fields it reads are filled in,
//! so the same rule set applies to every task.

use std::sync::OnceLock;

use pgxbench_common::{fields, AnnotationRecord};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::evaluators::{parse_numeric, parse_p_value};
use crate::tokenize::parse_list;

/// Category of a dependency violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    InvalidRsId,
    InvalidStarAllele,
    InvalidGeneSymbol,
    GeneProductWithoutGene,
    ComparisonWithoutVariant,
    DirectionWithoutAssociation,
    FunctionalTermsWithoutGeneProduct,
    ConfidenceIntervalInverted,
    RatioOutsideInterval,
    FrequencyOutOfRange,
    SignificantNullRatio,
    UnlinkedAnnotationId,
    PmidMismatch,
}

/// Fields whose scores a violation discounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffectedFields {
    Only(&'static [&'static str]),
    /// Not attributable to particular fields; discounts the whole record.
    All,
}

impl AffectedFields {
    pub fn contains(&self, field: &str) -> bool {
        match self {
            AffectedFields::Only(names) => names.contains(&field),
            AffectedFields::All => true,
        }
    }
}

impl ViolationKind {
    pub fn affected_fields(&self) -> AffectedFields {
        use fields::*;
        use ViolationKind::*;
        match self {
            InvalidRsId | InvalidStarAllele => AffectedFields::Only(&[VARIANT]),
            InvalidGeneSymbol | GeneProductWithoutGene => {
                AffectedFields::Only(&[GENE, GENE_PRODUCT])
            }
            ComparisonWithoutVariant => AffectedFields::Only(&[VARIANT, COMPARISON_ALLELES]),
            DirectionWithoutAssociation => AffectedFields::Only(&[DIRECTION, ASSOCIATION]),
            FunctionalTermsWithoutGeneProduct => {
                AffectedFields::Only(&[FUNCTIONAL_TERMS, GENE_PRODUCT])
            }
            ConfidenceIntervalInverted | RatioOutsideInterval => {
                AffectedFields::Only(&[CI_START, CI_STOP, RATIO_STAT])
            }
            FrequencyOutOfRange => AffectedFields::Only(&[
                FREQ_CASES,
                FREQ_CONTROLS,
                STUDY_CASES,
                STUDY_CONTROLS,
            ]),
            SignificantNullRatio => AffectedFields::Only(&[P_VALUE, RATIO_STAT, RATIO_STAT_TYPE]),
            UnlinkedAnnotationId => {
                AffectedFields::Only(&[VARIANT_ANNOTATION_ID, VARIANT, COMPARISON_ALLELES])
            }
            PmidMismatch => AffectedFields::All,
        }
    }
}

/// One detected violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyIssue {
    pub kind: ViolationKind,
    pub message: String,
}

impl DependencyIssue {
    fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

fn rsid_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^rs\d+$").unwrap())
}

fn star_allele_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9]+\*\d+$").unwrap())
}

fn gene_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9]+$").unwrap())
}

/// Run every rule against `record`. `related` may be empty, which disables the
/// cross-record checks.
pub fn validate(record: &AnnotationRecord, related: &[AnnotationRecord]) -> Vec<DependencyIssue> {
    let mut issues = Vec::new();
    check_identifiers(record, &mut issues);
    check_field_dependencies(record, &mut issues);
    check_statistics(record, &mut issues);
    if !related.is_empty() {
        check_links(record, related, &mut issues);
    }
    issues
}

fn check_identifiers(record: &AnnotationRecord, issues: &mut Vec<DependencyIssue>) {
    if let Some(variants) = record.non_empty(fields::VARIANT) {
        for token in parse_list(&variants) {
            if token.to_lowercase().starts_with("rs") {
                if !rsid_pattern().is_match(&token) {
                    issues.push(DependencyIssue::new(
                        ViolationKind::InvalidRsId,
                        format!("Invalid rsID format: {token}"),
                    ));
                }
            } else if token.contains('*') && !star_allele_pattern().is_match(&token) {
                issues.push(DependencyIssue::new(
                    ViolationKind::InvalidStarAllele,
                    format!("Invalid star allele format: {token}"),
                ));
            }
        }
    }

    if let Some(gene) = record.non_empty(fields::GENE) {
        if !gene_pattern().is_match(&gene) {
            issues.push(DependencyIssue::new(
                ViolationKind::InvalidGeneSymbol,
                format!("Invalid gene name format: {gene}"),
            ));
        }
    }
}

fn check_field_dependencies(record: &AnnotationRecord, issues: &mut Vec<DependencyIssue>) {
    let has = |field: &str| record.non_empty(field).is_some();

    if has(fields::GENE_PRODUCT) && !has(fields::GENE) {
        issues.push(DependencyIssue::new(
            ViolationKind::GeneProductWithoutGene,
            "Gene field required when Gene/gene product is specified",
        ));
    }

    if has(fields::COMPARISON_ALLELES) && !has(fields::VARIANT) {
        issues.push(DependencyIssue::new(
            ViolationKind::ComparisonWithoutVariant,
            "Variant/Haplotypes required when Comparison Allele(s) is specified",
        ));
    }

    if has(fields::DIRECTION) {
        let associated = record
            .text(fields::ASSOCIATION)
            .is_some_and(|a| a.trim().eq_ignore_ascii_case("associated with"));
        if !associated {
            issues.push(DependencyIssue::new(
                ViolationKind::DirectionWithoutAssociation,
                "Direction of effect requires 'Associated with' status",
            ));
        }
    }

    if has(fields::FUNCTIONAL_TERMS) && !has(fields::GENE_PRODUCT) {
        issues.push(DependencyIssue::new(
            ViolationKind::FunctionalTermsWithoutGeneProduct,
            "Gene/gene product recommended when Functional terms is specified",
        ));
    }
}

fn check_statistics(record: &AnnotationRecord, issues: &mut Vec<DependencyIssue>) {
    let number = |field: &str| record.text(field).as_deref().and_then(parse_numeric);
    let ratio = number(fields::RATIO_STAT);

    let p_value = record.text(fields::P_VALUE).as_deref().and_then(parse_p_value);
    if let (Some((_, Some(p))), Some(r)) = (p_value, ratio) {
        if record.non_empty(fields::RATIO_STAT_TYPE).is_some() && p < 0.05 && r == 1.0 {
            issues.push(DependencyIssue::new(
                ViolationKind::SignificantNullRatio,
                "P value is significant (< 0.05) but Ratio Stat equals 1.0",
            ));
        }
    }

    if let (Some(start), Some(stop)) = (number(fields::CI_START), number(fields::CI_STOP)) {
        if start >= stop {
            issues.push(DependencyIssue::new(
                ViolationKind::ConfidenceIntervalInverted,
                format!("Confidence Interval Start ({start}) should be less than Stop ({stop})"),
            ));
        }
        if let Some(r) = ratio {
            if r < start || r > stop {
                issues.push(DependencyIssue::new(
                    ViolationKind::RatioOutsideInterval,
                    format!("Ratio Stat ({r}) should be within Confidence Interval [{start}, {stop}]"),
                ));
            }
        }
    }

    for field in [fields::FREQ_CASES, fields::FREQ_CONTROLS] {
        if let Some(freq) = number(field) {
            if !(0.0..=1.0).contains(&freq) {
                issues.push(DependencyIssue::new(
                    ViolationKind::FrequencyOutOfRange,
                    format!("{field} ({freq}) should be between 0 and 1"),
                ));
            }
        }
    }
}

fn check_links(
    record: &AnnotationRecord,
    related: &[AnnotationRecord],
    issues: &mut Vec<DependencyIssue>,
) {
    if let Some(id) = record.non_empty(fields::VARIANT_ANNOTATION_ID) {
        let linked = related
            .iter()
            .any(|r| r.text(fields::VARIANT_ANNOTATION_ID).as_deref() == Some(id.as_str()));
        if !linked {
            issues.push(DependencyIssue::new(
                ViolationKind::UnlinkedAnnotationId,
                format!("Variant Annotation ID {id} not found in related records"),
            ));
        }
    }

    if let Some(pmid) = record.non_empty(fields::PMID) {
        let known: Vec<String> = related.iter().filter_map(|r| r.non_empty(fields::PMID)).collect();
        if !known.is_empty() && !known.contains(&pmid) {
            issues.push(DependencyIssue::new(
                ViolationKind::PmidMismatch,
                format!("PMID {pmid} inconsistent with related records"),
            ));
        }
    }
}
