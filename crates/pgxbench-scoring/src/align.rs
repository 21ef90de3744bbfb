//! Pairing predicted records with the ground-truth records they describe.
//!
//! Ground-truth records are visited in order. For each one the matching tiers
//! are tried in priority order and the first unclaimed prediction satisfying a
//! tier wins; later tiers are not consulted once a match is found. A
//! prediction is claimed by at most one ground-truth record.
//!
//! Study parameters have no variant text to anchor on, so records left over
//! after the identifier tier are paired by a separate greedy pass over lexical
//! field similarity.

use std::collections::BTreeSet;

use pgxbench_common::{fields, AnnotationRecord, EvaluationConfig};
use pgxbench_embed::LexicalSimilarity;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::evaluators::FieldScorer;
use crate::schema::TaskSchema;
use crate::tokenize::{extract_rsids, parse_drug_list, variant_key};

/// How an aligned pair was matched, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// Equal pre-resolved identifier.
    ResolvedId,
    /// Shared rsID.
    RsId,
    /// Normalized variant text of one side contained in the other.
    Substring,
    /// Same gene and same drug set.
    EntityPair,
    /// Greedy lexical similarity over non-identifier fields.
    FieldSimilarity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignedPair {
    pub gt: AnnotationRecord,
    pub pred: AnnotationRecord,
    pub match_key: String,
    pub tier: MatchTier,
}

/// Result of aligning one task's records. Pairs follow ground-truth order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Alignment {
    pub pairs: Vec<AlignedPair>,
    pub unmatched_gt: Vec<AnnotationRecord>,
    pub unmatched_pred: Vec<AnnotationRecord>,
}

impl Alignment {
    pub fn match_keys(&self) -> Vec<String> {
        self.pairs.iter().map(|p| p.match_key.clone()).collect()
    }
}

/// Indices of predictions already paired. Claiming returns a new set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSet(BTreeSet<usize>);

impl ClaimSet {
    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }

    #[must_use]
    pub fn claim(mut self, index: usize) -> Self {
        self.0.insert(index);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Candidates ───────────────────────────────────────────────────────────────

/// Match features extracted once per record.
struct Candidate {
    index: usize,
    resolved_id: Option<String>,
    drug_id: Option<String>,
    rsids: Vec<String>,
    variant: String,
    gene: Option<String>,
    drugs: Vec<String>,
}

impl Candidate {
    fn new(index: usize, record: &AnnotationRecord, schema: &TaskSchema) -> Self {
        let raw_variant = record.text(fields::VARIANT).unwrap_or_default();
        let mut drugs = record
            .text(fields::DRUGS)
            .map(|d| parse_drug_list(&d))
            .unwrap_or_default();
        drugs.sort();

        Self {
            index,
            resolved_id: schema.resolved_id(record),
            drug_id: record.resolved_drug_id(),
            rsids: extract_rsids(&raw_variant),
            variant: variant_key(&raw_variant),
            gene: record
                .non_empty(fields::GENE)
                .map(|g| g.trim().to_lowercase())
                .filter(|g| !g.is_empty()),
            drugs,
        }
    }
}

/// Match key when `pred` satisfies `tier` for `gt`.
fn tier_key(tier: MatchTier, gt: &Candidate, pred: &Candidate) -> Option<String> {
    match tier {
        MatchTier::ResolvedId => {
            let id = gt.resolved_id.as_ref()?;
            if pred.resolved_id.as_ref() != Some(id) {
                return None;
            }
            if let (Some(g), Some(p)) = (&gt.drug_id, &pred.drug_id) {
                if g != p {
                    return None;
                }
            }
            Some(format!("ID:{id}"))
        }
        MatchTier::RsId => gt.rsids.iter().find(|id| pred.rsids.contains(id)).cloned(),
        MatchTier::Substring => {
            if gt.variant.is_empty() || pred.variant.is_empty() {
                return None;
            }
            // rsIDs that already failed to intersect must not match as text ("rs1" in "rs12")
            if !gt.rsids.is_empty() && !pred.rsids.is_empty() {
                return None;
            }
            (gt.variant.contains(&pred.variant) || pred.variant.contains(&gt.variant))
                .then(|| gt.variant.clone())
        }
        MatchTier::EntityPair => {
            let gene = gt.gene.as_ref()?;
            if pred.gene.as_ref() != Some(gene) || gt.drugs.is_empty() || gt.drugs != pred.drugs {
                return None;
            }
            Some(format!("{gene}:{}", gt.drugs.join(",")))
        }
        MatchTier::FieldSimilarity => None,
    }
}

fn record_tiers(schema: &TaskSchema) -> Vec<MatchTier> {
    let mut tiers = vec![MatchTier::ResolvedId, MatchTier::RsId, MatchTier::Substring];
    if schema.entity_pair_fallback {
        tiers.push(MatchTier::EntityPair);
    }
    tiers
}

// ── Alignment ────────────────────────────────────────────────────────────────

type Assignment = (usize, String, MatchTier);

/// Align already-expanded ground truth and predictions for one task.
pub fn align(
    gt: &[AnnotationRecord],
    pred: &[AnnotationRecord],
    schema: &TaskSchema,
    config: &EvaluationConfig,
) -> Alignment {
    let gt_candidates: Vec<Candidate> = gt
        .iter()
        .enumerate()
        .map(|(i, r)| Candidate::new(i, r, schema))
        .collect();
    let pred_candidates: Vec<Candidate> = pred
        .iter()
        .enumerate()
        .map(|(i, r)| Candidate::new(i, r, schema))
        .collect();

    let tiers = record_tiers(schema);
    let mut assigned: Vec<Option<Assignment>> = vec![None; gt.len()];
    let mut claims = ClaimSet::default();

    for g in &gt_candidates {
        let found = tiers.iter().find_map(|&tier| {
            pred_candidates
                .iter()
                .filter(|p| !claims.contains(p.index))
                .find_map(|p| tier_key(tier, g, p).map(|key| (p.index, key, tier)))
        });
        if let Some((pi, key, tier)) = found {
            claims = claims.claim(pi);
            assigned[g.index] = Some((pi, key, tier));
        }
    }

    if schema.similarity_fallback {
        claims = assign_by_similarity(gt, pred, schema, config, claims, &mut assigned);
    }

    let mut alignment = Alignment::default();
    for (gi, slot) in assigned.into_iter().enumerate() {
        match slot {
            Some((pi, match_key, tier)) => alignment.pairs.push(AlignedPair {
                gt: gt[gi].clone(),
                pred: pred[pi].clone(),
                match_key,
                tier,
            }),
            None => alignment.unmatched_gt.push(gt[gi].clone()),
        }
    }
    alignment.unmatched_pred = pred
        .iter()
        .enumerate()
        .filter(|(i, _)| !claims.contains(*i))
        .map(|(_, r)| r.clone())
        .collect();

    debug!(
        "{}: aligned {} of {} ground-truth records ({} predictions unclaimed)",
        schema.kind,
        alignment.pairs.len(),
        gt.len(),
        alignment.unmatched_pred.len()
    );
    alignment
}

/// Mean lexical field similarity over non-identifier fields.
pub fn record_similarity(
    gt: &AnnotationRecord,
    pred: &AnnotationRecord,
    schema: &TaskSchema,
    config: &EvaluationConfig,
) -> f64 {
    let lexical = LexicalSimilarity;
    let scorer = FieldScorer::new(&lexical, config);
    let scores: Vec<f64> = schema
        .aggregated_fields()
        .map(|f| scorer.score(f.evaluator, f.name, gt, pred))
        .collect();
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

fn assign_by_similarity(
    gt: &[AnnotationRecord],
    pred: &[AnnotationRecord],
    schema: &TaskSchema,
    config: &EvaluationConfig,
    mut claims: ClaimSet,
    assigned: &mut [Option<Assignment>],
) -> ClaimSet {
    let threshold = config.similarity_alignment_threshold;
    let mut scored: Vec<(usize, usize, f64)> = Vec::new();
    for (gi, g) in gt.iter().enumerate() {
        if assigned[gi].is_some() {
            continue;
        }
        for (pi, p) in pred.iter().enumerate() {
            if claims.contains(pi) {
                continue;
            }
            let similarity = record_similarity(g, p, schema, config);
            if similarity >= threshold {
                scored.push((gi, pi, similarity));
            }
        }
    }

    // Stable sort keeps encounter order (gt, then pred) among equal scores.
    scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut taken = 0;
    for (gi, pi, _) in scored {
        if assigned[gi].is_some() || claims.contains(pi) {
            continue;
        }
        claims = claims.claim(pi);
        assigned[gi] = Some((pi, study_key(&gt[gi]), MatchTier::FieldSimilarity));
        taken += 1;
    }
    if taken > 0 {
        debug!("{}: {} pairs matched by field similarity", schema.kind, taken);
    }
    claims
}

/// `<Study Type>[:<first 20 chars of Characteristics>]`
fn study_key(record: &AnnotationRecord) -> String {
    let study_type = record
        .non_empty(fields::STUDY_TYPE)
        .unwrap_or_else(|| "Unknown".to_string());
    match record.non_empty(fields::CHARACTERISTICS) {
        Some(chars) => format!("{study_type}:{}", chars.chars().take(20).collect::<String>()),
        None => study_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TaskKind;
    use pgxbench_common::fields::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn variant(v: &str) -> AnnotationRecord {
        AnnotationRecord::new().with(VARIANT, v)
    }

    fn run(kind: TaskKind, gt: &[AnnotationRecord], pred: &[AnnotationRecord]) -> Alignment {
        align(gt, pred, &TaskSchema::for_task(kind), &EvaluationConfig::default())
    }

    #[test]
    fn test_claim_set_is_functional() {
        let empty = ClaimSet::default();
        let one = empty.clone().claim(3);
        assert!(empty.is_empty());
        assert!(one.contains(3));
        assert_eq!(one.claim(3).len(), 1);
    }

    #[test]
    fn test_resolved_id_beats_rsid() {
        let gt = vec![variant("rs1057910")
            .with(VARIANT_NORMALIZED, json!({"variant_id": "VA123"}))];
        let pred = vec![
            variant("rs1057910"),
            variant("CYP2C9 star 3").with(VARIANT_NORMALIZED, json!({"variant_id": "VA123"})),
        ];
        let alignment = run(TaskKind::Drug, &gt, &pred);

        assert_eq!(alignment.pairs.len(), 1);
        assert_eq!(alignment.pairs[0].tier, MatchTier::ResolvedId);
        assert_eq!(alignment.pairs[0].match_key, "ID:VA123");
        assert_eq!(alignment.pairs[0].pred, pred[1]);
        assert_eq!(alignment.unmatched_pred, vec![pred[0].clone()]);
    }

    #[test]
    fn test_resolved_drug_ids_must_agree() {
        let tagged = |drug: &str| {
            variant("x")
                .with(VARIANT_NORMALIZED, json!({"variant_id": "VA1"}))
                .with(DRUGS_NORMALIZED, json!({"drug_id": drug}))
        };
        let alignment = run(TaskKind::Drug, &[tagged("PA1")], &[tagged("PA2")]);
        // falls through to the substring tier on the variant text
        assert_eq!(alignment.pairs[0].tier, MatchTier::Substring);
    }

    #[test]
    fn test_substring_either_direction() {
        let gt = vec![variant("CYP2D6*4xN")];
        let pred = vec![variant("CYP2D6*4")];
        let alignment = run(TaskKind::Drug, &gt, &pred);

        assert_eq!(alignment.pairs.len(), 1);
        assert_eq!(alignment.pairs[0].tier, MatchTier::Substring);
        assert_eq!(alignment.pairs[0].match_key, "cyp2d6*4xn");
    }

    #[test]
    fn test_distinct_rsids_never_match_as_text() {
        let alignment = run(TaskKind::Drug, &[variant("rs12")], &[variant("rs1")]);
        assert!(alignment.pairs.is_empty());
        assert_eq!(alignment.unmatched_gt.len(), 1);

        // an rsID on one side only does not block containment
        let alignment = run(
            TaskKind::Drug,
            &[variant("CYP2C19*2")],
            &[variant("CYP2C19*2 (rs4244285)")],
        );
        assert_eq!(alignment.pairs[0].tier, MatchTier::Substring);
        assert_eq!(alignment.pairs[0].match_key, "cyp2c19*2");
    }

    #[test]
    fn test_rsid_then_substring() {
        let gt = vec![variant("rs4244285 (CYP2C19*2)"), variant("CYP2D6*4")];
        let pred = vec![variant("cyp2d6*4xn"), variant("RS4244285")];
        let alignment = run(TaskKind::FunctionalAnalysis, &gt, &pred);

        assert_eq!(alignment.match_keys(), vec!["rs4244285", "cyp2d6*4"]);
        assert_eq!(
            alignment.pairs.iter().map(|p| p.tier).collect::<Vec<_>>(),
            vec![MatchTier::RsId, MatchTier::Substring]
        );
        assert!(alignment.unmatched_gt.is_empty());
    }

    #[test]
    fn test_prediction_claimed_once() {
        let gt = vec![variant("rs1"), variant("rs1")];
        let pred = vec![variant("rs1")];
        let alignment = run(TaskKind::Drug, &gt, &pred);
        assert_eq!(alignment.pairs.len(), 1);
        assert_eq!(alignment.unmatched_gt.len(), 1);
        assert!(alignment.unmatched_pred.is_empty());
    }

    #[test]
    fn test_empty_variants_never_match() {
        let gt = vec![AnnotationRecord::new().with(GENE, "VKORC1")];
        let pred = vec![AnnotationRecord::new().with(GENE, "VKORC1")];
        let alignment = run(TaskKind::Drug, &gt, &pred);
        assert!(alignment.pairs.is_empty());
    }

    #[test]
    fn test_entity_pair_only_for_phenotype() {
        let gt = vec![AnnotationRecord::new()
            .with(GENE, "CYP2C19")
            .with(DRUGS, "clopidogrel, aspirin")];
        let pred = vec![AnnotationRecord::new()
            .with(GENE, "cyp2c19")
            .with(DRUGS, "Aspirin or clopidogrel")];

        let pheno = run(TaskKind::Phenotype, &gt, &pred);
        assert_eq!(pheno.pairs.len(), 1);
        assert_eq!(pheno.pairs[0].tier, MatchTier::EntityPair);
        assert_eq!(pheno.pairs[0].match_key, "cyp2c19:aspirin,clopidogrel");

        assert!(run(TaskKind::Drug, &gt, &pred).pairs.is_empty());
    }

    #[test]
    fn test_study_parameters_by_id_then_similarity() {
        let study = |id: &str, kind: &str, cases: i64| {
            AnnotationRecord::new()
                .with(VARIANT_ANNOTATION_ID, id)
                .with(STUDY_TYPE, kind)
                .with(STUDY_CASES, cases)
                .with(CHARACTERISTICS, "Warfarin-treated adults of European ancestry")
        };
        let gt = vec![study("1", "cohort", 120), study("2", "case/control", 80)];
        let pred = vec![study("9", "case/control", 80), study("1", "cohort", 100)];
        let alignment = run(TaskKind::StudyParameters, &gt, &pred);

        assert_eq!(alignment.pairs.len(), 2);
        assert_eq!(alignment.pairs[0].tier, MatchTier::ResolvedId);
        assert_eq!(alignment.pairs[0].match_key, "ID:1");
        assert_eq!(alignment.pairs[1].tier, MatchTier::FieldSimilarity);
        assert_eq!(alignment.pairs[1].match_key, "case/control:Warfarin-treated adu");
    }

    #[test]
    fn test_similarity_below_threshold_stays_unmatched() {
        let gt = vec![AnnotationRecord::new()
            .with(STUDY_TYPE, "cohort")
            .with(STUDY_CASES, 500)
            .with(P_VALUE, "< 0.001")];
        let pred = vec![AnnotationRecord::new()
            .with(STUDY_TYPE, "GWAS")
            .with(STUDY_CASES, 12)
            .with(P_VALUE, "= 0.4")
            .with(STUDY_CONTROLS, 10)
            .with(CHARACTERISTICS, "x")
            .with(CHARACTERISTICS_TYPE, "y")
            .with(FREQ_CASES, 0.1)
            .with(ALLELE_FREQ_CASES, "A")
            .with(FREQ_CONTROLS, 0.2)
            .with(ALLELE_FREQ_CONTROLS, "G")
            .with(RATIO_STAT_TYPE, "OR")
            .with(RATIO_STAT, 2.0)
            .with(CI_START, 1.0)
            .with(CI_STOP, 3.0)
            .with(BIOGEOGRAPHICAL_GROUPS, "Europe")];
        let alignment = run(TaskKind::StudyParameters, &gt, &pred);
        assert!(alignment.pairs.is_empty());
        assert_eq!(alignment.unmatched_gt.len(), 1);
        assert_eq!(alignment.unmatched_pred.len(), 1);
    }
}
