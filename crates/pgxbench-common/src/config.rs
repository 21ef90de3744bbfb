//! Evaluation configuration.
//!
//! Everything has a sensible default so an empty file (or no file at all) yields
//! the standard benchmark behaviour. Users can tune penalties, tolerance bands,
//! and per-task field weights via YAML, JSON, or TOML.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Complete evaluation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Dependency-issue penalty policy
    #[serde(default)]
    pub penalty: PenaltyPolicy,

    /// Score bands for numeric comparisons
    #[serde(default)]
    pub tolerance: ToleranceBands,

    /// Minimum sequence ratio for two drug tokens to count as the same drug
    #[serde(default = "default_drug_match_threshold")]
    pub drug_match_threshold: f64,

    /// Minimum lexical similarity for similarity-based study parameter alignment
    #[serde(default = "default_alignment_threshold")]
    pub similarity_alignment_threshold: f64,

    /// Per-task field weight overrides, keyed by task key (e.g. "var_pheno_ann")
    #[serde(default)]
    pub weights: HashMap<String, HashMap<String, f64>>,
}

fn default_drug_match_threshold() -> f64 { 0.85 }
fn default_alignment_threshold() -> f64 { 0.3 }

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            penalty: PenaltyPolicy::default(),
            tolerance: ToleranceBands::default(),
            drug_match_threshold: default_drug_match_threshold(),
            similarity_alignment_threshold: default_alignment_threshold(),
            weights: HashMap::new(),
        }
    }
}

// ── Penalties ─────────────────────────────────────────────────────────────────

/// Multiplicative discount applied to fields touched by dependency issues.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyPolicy {
    /// Penalty per detected issue
    #[serde(default = "default_per_issue")]
    pub per_issue: f64,

    /// Upper bound on the total penalty for one record
    #[serde(default = "default_penalty_cap")]
    pub cap: f64,
}

fn default_per_issue() -> f64 { 0.05 }
fn default_penalty_cap() -> f64 { 0.30 }

impl Default for PenaltyPolicy {
    fn default() -> Self {
        Self {
            per_issue: default_per_issue(),
            cap: default_penalty_cap(),
        }
    }
}

impl PenaltyPolicy {
    /// Total penalty for `issue_count` issues, in [0, cap].
    pub fn total(&self, issue_count: usize) -> f64 {
        (self.per_issue * issue_count as f64).min(self.cap).max(0.0)
    }
}

// ── Numeric tolerance ────────────────────────────────────────────────────────

/// Scores awarded by relative-difference band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceBands {
    /// Score for an exact numeric match
    #[serde(default = "default_exact")]
    pub exact: f64,

    /// Score when the relative difference is at most 5%
    #[serde(default = "default_within_5")]
    pub within_5pct: f64,

    /// Score when the relative difference is at most 10%
    #[serde(default = "default_within_10")]
    pub within_10pct: f64,
}

fn default_exact() -> f64 { 1.0 }
fn default_within_5() -> f64 { 0.9 }
fn default_within_10() -> f64 { 0.8 }

impl Default for ToleranceBands {
    fn default() -> Self {
        Self {
            exact: default_exact(),
            within_5pct: default_within_5(),
            within_10pct: default_within_10(),
        }
    }
}

impl ToleranceBands {
    /// Bands used for p-value magnitudes, which are noisier in the literature.
    pub fn p_value() -> Self {
        Self {
            within_10pct: 0.7,
            ..Default::default()
        }
    }
}

// ── Helper Methods ─────────────────────────────────────────────────────────────

impl EvaluationConfig {
    /// Load from YAML file
    pub fn from_yaml(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validated()
    }

    /// Load from JSON file
    pub fn from_json(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validated()
    }

    /// Load from TOML file
    pub fn from_toml(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validated()
    }

    /// Weight overrides for one task, if any were configured.
    pub fn task_weights(&self, task_key: &str) -> Option<&HashMap<String, f64>> {
        self.weights.get(task_key)
    }

    fn validated(self) -> anyhow::Result<Self> {
        let unit = |v: f64| (0.0..=1.0).contains(&v);
        if !unit(self.penalty.per_issue) || !unit(self.penalty.cap) {
            anyhow::bail!("penalty values must lie in [0, 1]");
        }
        if !unit(self.drug_match_threshold) || !unit(self.similarity_alignment_threshold) {
            anyhow::bail!("thresholds must lie in [0, 1]");
        }
        let bands = self.tolerance;
        if !unit(bands.exact) || !unit(bands.within_5pct) || !unit(bands.within_10pct) {
            anyhow::bail!("tolerance band scores must lie in [0, 1]");
        }
        if let Some((task, field)) = self.weights.iter().find_map(|(task, table)| {
            table
                .iter()
                .find(|(_, w)| !w.is_finite() || **w < 0.0)
                .map(|(field, _)| (task.clone(), field.clone()))
        }) {
            anyhow::bail!("weight for {task}/{field} must be a non-negative number");
        }
        tracing::debug!(tasks = self.weights.len(), "Loaded evaluation config");
        Ok(self)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
