//! Field-level similarity functions.
//!
//! Every evaluator maps a (ground truth, prediction) value pair to a score in
//! [0, 1]. Absence is symmetric: both sides absent is a perfect match, exactly
//! one side absent scores 0. Faults never escape an evaluator: unparseable
//! numbers score 0 and similarity-provider errors fall back to a lexical ratio.

use std::sync::OnceLock;

use pgxbench_common::text::{fold, sequence_ratio};
use pgxbench_common::{fields, AnnotationRecord, EvaluationConfig, ToleranceBands};
use pgxbench_embed::SimilarityProvider;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tokenize::{parse_allele_tokens, parse_drug_list};

/// Comparison strategy assigned to a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evaluator {
    /// Trimmed, case-insensitive equality.
    Exact,
    /// Like `Exact`, with internal whitespace runs collapsed.
    Categorical,
    /// Relative-difference bands over parsed numbers.
    NumericTolerance,
    /// Fraction of ground-truth allele tokens present in the prediction.
    SetCoverage,
    /// Ground truth contained in prediction; phenotype-group labels by equality.
    SubstringContainment,
    /// Embedding similarity via the injected provider.
    Semantic,
    /// Operator-aware fuzzy drug-list coverage. Reads `Multiple drugs And/or`.
    DrugCoverage,
    /// Comparison operator plus magnitude.
    PValue,
}

/// Labels that sometimes fill the variant field in place of a variant. Matching
/// "poor metabolizers" inside "intermediate/poor metabolizers" would be wrong.
const PHENOTYPE_GROUP_LABELS: &[&str] = &[
    "poor metabolizers",
    "intermediate metabolizers",
    "extensive metabolizers",
    "ultra-rapid metabolizers",
    "intermediate activity",
    "reduced function",
    "normal function",
];

// ── Scorer ───────────────────────────────────────────────────────────────────

/// Applies evaluators to record pairs with a fixed provider and configuration.
pub struct FieldScorer<'a> {
    provider: &'a dyn SimilarityProvider,
    config: &'a EvaluationConfig,
}

impl<'a> FieldScorer<'a> {
    pub fn new(provider: &'a dyn SimilarityProvider, config: &'a EvaluationConfig) -> Self {
        Self { provider, config }
    }

    /// Score one field of an aligned pair. Always in [0, 1].
    pub fn score(
        &self,
        evaluator: Evaluator,
        field: &str,
        gt: &AnnotationRecord,
        pred: &AnnotationRecord,
    ) -> f64 {
        let g = gt.text(field);
        let p = pred.text(field);
        let (g, p) = (g.as_deref(), p.as_deref());

        let score = match evaluator {
            Evaluator::Exact => exact_match(g, p),
            Evaluator::Categorical => category_equal(g, p),
            Evaluator::NumericTolerance => numeric_tolerance(g, p, &self.config.tolerance),
            Evaluator::SetCoverage => set_coverage(g, p),
            Evaluator::SubstringContainment => substring_containment(g, p),
            Evaluator::Semantic => semantic_similarity(g, p, self.provider),
            Evaluator::DrugCoverage => drug_coverage(gt, pred, self.config.drug_match_threshold),
            Evaluator::PValue => p_value_match(g, p, &ToleranceBands::p_value()),
        };
        unit(score)
    }
}

fn unit(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Shared absent-value handling. `Some(score)` when the outcome is decided.
fn presence(gt: Option<&str>, pred: Option<&str>) -> Option<f64> {
    match (gt, pred) {
        (None, None) => Some(1.0),
        (None, _) | (_, None) => Some(0.0),
        _ => None,
    }
}

// ── String equality ──────────────────────────────────────────────────────────

pub fn exact_match(gt: Option<&str>, pred: Option<&str>) -> f64 {
    if let Some(decided) = presence(gt, pred) {
        return decided;
    }
    let (g, p) = (gt.unwrap_or_default(), pred.unwrap_or_default());
    if g.trim().to_lowercase() == p.trim().to_lowercase() {
        1.0
    } else {
        0.0
    }
}

pub fn category_equal(gt: Option<&str>, pred: Option<&str>) -> f64 {
    if let Some(decided) = presence(gt, pred) {
        return decided;
    }
    if fold(gt.unwrap_or_default()) == fold(pred.unwrap_or_default()) {
        1.0
    } else {
        0.0
    }
}

pub fn substring_containment(gt: Option<&str>, pred: Option<&str>) -> f64 {
    if let Some(decided) = presence(gt, pred) {
        return decided;
    }
    let g = fold(gt.unwrap_or_default());
    let p = fold(pred.unwrap_or_default());

    let is_label = |s: &str| PHENOTYPE_GROUP_LABELS.contains(&s);
    if is_label(&g) || is_label(&p) {
        return if g == p { 1.0 } else { 0.0 };
    }
    if g.is_empty() {
        return if p.is_empty() { 1.0 } else { 0.0 };
    }
    if p.contains(&g) {
        1.0
    } else {
        0.0
    }
}

// ── Numbers ──────────────────────────────────────────────────────────────────

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?").unwrap())
}

fn p_operator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([<>=≤≥]=?)").unwrap())
}

/// Parse a number written with thousands separators, currency symbols, or
/// scientific notation ("1,234", "$50", "2.5e-3"). Non-finite values are rejected.
pub fn parse_numeric(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, ',' | '$' | '€' | '£' | '¥'))
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Score two parsed numbers against the tolerance bands.
///
/// Relative difference is taken against the larger magnitude, so the result
/// does not depend on which side is the reference.
pub fn tolerance_score(gt: f64, pred: f64, bands: &ToleranceBands) -> f64 {
    if gt == pred {
        return bands.exact;
    }
    if gt == 0.0 || pred == 0.0 {
        return 0.0;
    }
    let relative = (gt - pred).abs() / gt.abs().max(pred.abs());
    if relative <= 0.05 {
        bands.within_5pct
    } else if relative <= 0.10 {
        bands.within_10pct
    } else {
        0.0
    }
}

/// Blank numeric cells count as absent; present but unparseable values score 0.
pub fn numeric_tolerance(gt: Option<&str>, pred: Option<&str>, bands: &ToleranceBands) -> f64 {
    let gt = gt.filter(|s| !s.trim().is_empty());
    let pred = pred.filter(|s| !s.trim().is_empty());
    if let Some(decided) = presence(gt, pred) {
        return decided;
    }
    match (
        gt.and_then(parse_numeric),
        pred.and_then(parse_numeric),
    ) {
        (Some(g), Some(p)) => tolerance_score(g, p, bands),
        _ => 0.0,
    }
}

/// Split a p-value cell into its comparison operator (default `=`) and magnitude.
/// `<=`/`>=` are folded into `≤`/`≥`. Returns `None` for a blank cell.
pub fn parse_p_value(text: &str) -> Option<(String, Option<f64>)> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let operator = match p_operator_regex().find(text).map(|m| m.as_str()) {
        Some("<=") | Some("≤") | Some("≤=") => "≤",
        Some(">=") | Some("≥") | Some("≥=") => "≥",
        Some("<") => "<",
        Some(">") => ">",
        _ => "=",
    };
    let cleaned = text.replace(',', "");
    let magnitude = number_regex()
        .find(&cleaned)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite());
    Some((operator.to_string(), magnitude))
}

/// Half credit for the operator, half for the magnitude.
pub fn p_value_match(gt: Option<&str>, pred: Option<&str>, bands: &ToleranceBands) -> f64 {
    let g = gt.and_then(parse_p_value);
    let p = pred.and_then(parse_p_value);
    let ((g_op, g_val), (p_op, p_val)) = match (g, p) {
        (None, None) => return 1.0,
        (Some(g), Some(p)) => (g, p),
        _ => return 0.0,
    };
    if gt.map(fold) == pred.map(fold) {
        return 1.0;
    }

    let operator_score = if g_op == p_op { 1.0 } else { 0.0 };
    let magnitude_score = match (g_val, p_val) {
        (Some(g), Some(p)) => tolerance_score(g, p, bands),
        // "NS" vs "n.s.": neither side states a magnitude
        (None, None) => bands.exact,
        _ => 0.0,
    };
    0.5 * operator_score + 0.5 * magnitude_score
}

// ── Token sets ───────────────────────────────────────────────────────────────

/// |gt ∩ pred| / |gt| over allele tokens.
pub fn set_coverage(gt: Option<&str>, pred: Option<&str>) -> f64 {
    let mut g = gt.map(parse_allele_tokens).unwrap_or_default();
    let p = pred.map(parse_allele_tokens).unwrap_or_default();
    match (g.is_empty(), p.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }
    g.sort();
    g.dedup();
    let covered = g.iter().filter(|t| p.contains(t)).count();
    covered as f64 / g.len() as f64
}

/// Coverage of ground-truth drugs by predicted drugs.
///
/// The combination operator comes from `Multiple drugs And/or` (ground truth
/// first, then prediction, default "or"). Under "and" the score is the matched
/// fraction; under "or" any single match is enough for full credit.
pub fn drug_coverage(gt: &AnnotationRecord, pred: &AnnotationRecord, threshold: f64) -> f64 {
    let operator = gt
        .non_empty(fields::DRUG_OPERATOR)
        .or_else(|| pred.non_empty(fields::DRUG_OPERATOR))
        .map(|op| op.trim().to_lowercase())
        .unwrap_or_else(|| "or".to_string());

    drug_list_coverage(
        gt.text(fields::DRUGS).as_deref(),
        pred.text(fields::DRUGS).as_deref(),
        &operator,
        threshold,
    )
}

pub fn drug_list_coverage(
    gt: Option<&str>,
    pred: Option<&str>,
    operator: &str,
    threshold: f64,
) -> f64 {
    let g = gt.map(parse_drug_list).unwrap_or_default();
    let p = pred.map(parse_drug_list).unwrap_or_default();
    match (g.is_empty(), p.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }

    let matched = g
        .iter()
        .filter(|gt_drug| {
            p.iter()
                .any(|pred_drug| pred_drug == *gt_drug || sequence_ratio(gt_drug, pred_drug) >= threshold)
        })
        .count();
    let fraction = matched as f64 / g.len() as f64;

    if operator == "and" {
        fraction
    } else {
        fraction.max(if matched > 0 { 1.0 } else { 0.0 })
    }
}

// ── Semantic ─────────────────────────────────────────────────────────────────

/// Provider similarity, short-circuiting on identical text.
pub fn semantic_similarity(
    gt: Option<&str>,
    pred: Option<&str>,
    provider: &dyn SimilarityProvider,
) -> f64 {
    if let Some(decided) = presence(gt, pred) {
        return decided;
    }
    let g = gt.unwrap_or_default().trim();
    let p = pred.unwrap_or_default().trim();
    if g == p {
        return 1.0;
    }
    match provider.similarity(g, p) {
        Ok(score) => unit(score),
        Err(e) => {
            debug!("{} failed ({}), using lexical ratio", provider.name(), e);
            sequence_ratio(&g.to_lowercase(), &p.to_lowercase())
        }
    }
}
