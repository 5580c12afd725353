//! Per-repository preference model and its update rules.
//!
//! The model is updated strictly by EMA/bounded-increment math so any
//! sequence of decisions keeps every weight inside its documented range:
//! - `category_weights[c] ∈ [0.1, 1.0]`, step ±0.01
//! - `acceptance_rates[k] ∈ [0, 1]`, EMA factor exactly 0.95
//!
//! Models are versioned monotonically; persistence is append-only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::finding::{DecisionContext, Severity};
use storage::records::DecisionAction;

const WEIGHT_STEP: f32 = 0.01;
const WEIGHT_MIN: f32 = 0.1;
const WEIGHT_MAX: f32 = 1.0;
const EMA_KEEP: f32 = 0.95;
const EMA_GAIN: f32 = 0.05;

/// Dismissal explanations that justify learning an ignored pattern.
const IGNORABLE_REASONS: [&str; 5] = [
    "false positive",
    "intentional",
    "not applicable",
    "already handled",
    "style preference",
];

/// How much detail review output should carry for this repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verbosity {
    Minimal,
    Balanced,
    Detailed,
}

/// Admin-authored rule; overrides learned weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRule {
    /// Substring matched against the finding message (case-insensitive).
    pub pattern: String,
    pub action: RuleAction,
    pub severity: Option<Severity>,
    pub confidence: f32,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAction {
    AlwaysFlag,
    NeverFlag,
    FlagWithSeverity,
}

/// Learned weights for one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoPreferenceModel {
    pub repository_id: String,
    pub version: i64,
    pub data_points: i64,
    /// Per-category multiplier in [0.1, 1.0]; categories keyed uppercase.
    pub category_weights: BTreeMap<String, f32>,
    /// EMA acceptance per "CATEGORY|SEVERITY" key, in [0, 1].
    pub acceptance_rates: BTreeMap<String, f32>,
    /// Learned message prefixes the team keeps dismissing.
    pub ignored_patterns: Vec<String>,
    pub custom_rules: Vec<TeamRule>,
    pub verbosity: Verbosity,
}

impl RepoPreferenceModel {
    pub fn new(repository_id: &str) -> Self {
        Self {
            repository_id: repository_id.to_string(),
            version: 0,
            data_points: 0,
            category_weights: BTreeMap::new(),
            acceptance_rates: BTreeMap::new(),
            ignored_patterns: Vec::new(),
            custom_rules: Vec::new(),
            verbosity: Verbosity::Balanced,
        }
    }

    pub fn weight_for(&self, category: &str) -> f32 {
        *self
            .category_weights
            .get(&category.to_ascii_uppercase())
            .unwrap_or(&WEIGHT_MAX)
    }

    pub fn acceptance_for(&self, rate_key: &str) -> f32 {
        *self.acceptance_rates.get(rate_key).unwrap_or(&1.0)
    }

    /// Fold one reviewer decision into the model.
    pub fn apply_decision(
        &mut self,
        action: DecisionAction,
        context: &DecisionContext,
        feedback: Option<&str>,
    ) {
        let category = context.category.to_ascii_uppercase();
        let rate_key = format!("{category}|{}", context.severity.to_ascii_uppercase());

        // Category weight: bounded ±0.01 step.
        let delta = if action == DecisionAction::Accepted {
            WEIGHT_STEP
        } else {
            -WEIGHT_STEP
        };
        let weight = self.category_weights.entry(category).or_insert(WEIGHT_MAX);
        *weight = (*weight + delta).clamp(WEIGHT_MIN, WEIGHT_MAX);

        // Acceptance rate: EMA with factor exactly 0.95.
        let observed = if action == DecisionAction::Accepted {
            1.0
        } else {
            0.0
        };
        let rate = self.acceptance_rates.entry(rate_key).or_insert(1.0);
        *rate = (EMA_KEEP * *rate + EMA_GAIN * observed).clamp(0.0, 1.0);

        // Dismissals with a recognized explanation teach an ignored pattern.
        if action == DecisionAction::Dismissed {
            if let Some(reason) = feedback {
                let lowered = reason.to_ascii_lowercase();
                if IGNORABLE_REASONS.iter().any(|r| lowered.contains(r)) {
                    if let Some(snippet) = &context.snippet {
                        let pattern = first_words(snippet, 5);
                        if !pattern.is_empty() && !self.ignored_patterns.contains(&pattern) {
                            self.ignored_patterns.push(pattern);
                        }
                    }
                }
            }
        }

        // Human edits steer verbosity: short rewrites mean we talk too much.
        if action == DecisionAction::Modified {
            if let (Some(snippet), Some(edited)) = (&context.snippet, feedback) {
                if !snippet.is_empty() {
                    let ratio = edited.len() as f32 / snippet.len() as f32;
                    if ratio < 0.5 {
                        self.verbosity = Verbosity::Minimal;
                    } else if ratio > 1.5 {
                        self.verbosity = Verbosity::Detailed;
                    }
                }
            }
        }

        self.version += 1;
        self.data_points += 1;
    }
}

/// First `n` whitespace-separated words, lowercased.
fn first_words(text: &str, n: usize) -> String {
    text.split_whitespace()
        .take(n)
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}
