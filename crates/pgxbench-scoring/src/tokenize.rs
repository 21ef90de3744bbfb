//! Splitting multi-valued annotation fields into canonical tokens.
//!
//! Variants, drugs, and alleles are free text in curated exports: several
//! values share one cell, separated by commas, semicolons, pipes, "+" or the
//! word "or". Everything downstream (alignment, set-based scoring, the
//! validator) works on the token lists produced here.

use std::sync::OnceLock;

use pgxbench_common::{fields, AnnotationRecord};
use regex::Regex;

fn list_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "rs1, rs2", "rs1; rs2", "CYP2C19*2 + *3"
    RE.get_or_init(|| Regex::new(r"[,;|\s]+(?:\+\s*)?").unwrap())
}

fn drug_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i),|\bor\b").unwrap())
}

fn allele_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[+/,;\s]+").unwrap())
}

fn rsid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)rs\d+").unwrap())
}

/// Split a delimiter-separated list, dropping empty pieces. Order is kept.
pub fn parse_list(text: &str) -> Vec<String> {
    list_separator()
        .split(text)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// rsIDs are lower-cased; other variant tokens (star alleles, HGVS) lose all whitespace.
pub fn normalize_variant(token: &str) -> String {
    let token = token.trim();
    if token.to_lowercase().starts_with("rs") {
        token.to_lowercase()
    } else {
        token.split_whitespace().collect()
    }
}

/// Lower-cased normalized variant string used for containment matching.
pub fn variant_key(raw: &str) -> String {
    normalize_variant(raw).to_lowercase()
}

/// Emit one record per variant token for records listing several variants.
///
/// Expanded copies carry the normalized token in `Variant/Haplotypes` and are
/// tagged with `_expanded_from_multi_variant`. Records with zero or one token
/// pass through untouched.
pub fn expand_by_variant(records: &[AnnotationRecord]) -> Vec<AnnotationRecord> {
    let mut expanded = Vec::with_capacity(records.len());
    for record in records {
        let tokens = record
            .non_empty(fields::VARIANT)
            .map(|v| parse_list(&v))
            .unwrap_or_default();
        if tokens.len() <= 1 {
            expanded.push(record.clone());
            continue;
        }
        for token in tokens {
            expanded.push(
                record
                    .clone()
                    .with(fields::VARIANT, normalize_variant(&token))
                    .with(fields::EXPANDED_MARKER, true),
            );
        }
    }
    expanded
}

/// Canonical drug name: lower-case, hyphens as spaces, padded slashes, single spaces.
pub fn normalize_drug(name: &str) -> String {
    let name = name.to_lowercase().replace('-', " ").replace('/', " / ");
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drug tokens split on commas or the word "or", de-duplicated in encounter order.
/// Slash combinations ("trimethoprim / sulfamethoxazole") stay one token.
pub fn parse_drug_list(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for part in drug_separator().split(text) {
        let token = normalize_drug(part);
        if !token.is_empty() && !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

/// Allele and genotype tokens, lower-cased.
pub fn parse_allele_tokens(text: &str) -> Vec<String> {
    allele_separator()
        .split(text)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// All rsIDs mentioned in `text`, lower-cased, first occurrence order, no repeats.
pub fn extract_rsids(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for m in rsid_regex().find_iter(text) {
        let id = m.as_str().to_lowercase();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}
