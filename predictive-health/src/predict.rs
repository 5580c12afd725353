//! Prediction assembly: trained model or heuristic fallback, confidence,
//! and blocker probabilities.

use serde::{Deserialize, Serialize};

use crate::features::{FeatureVector, WorkflowObservation, FEATURE_NAMES};
use crate::regression::{LinearModel, MAX_HOURS, MIN_HOURS};

/// Published heuristic weights, used when no trained model exists.
///
/// Hours added per unit of each signal; tuned against public merge-time
/// studies rather than this repository's data.
const HEURISTIC_BASE_HOURS: f64 = 6.0;
const HEURISTIC_PER_100_LINES: f64 = 1.5;
const HEURISTIC_PER_10_FILES: f64 = 2.0;
const HEURISTIC_RISK_STEP: f64 = 6.0;
const HEURISTIC_CRITICAL_ISSUE: f64 = 8.0;
const HEURISTIC_HIGH_ISSUE: f64 = 3.0;
const HEURISTIC_WEEKEND: f64 = 12.0;
const HEURISTIC_NO_TESTS: f64 = 4.0;
const HEURISTIC_NO_DESCRIPTION: f64 = 2.0;

/// A named blocker with its probability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blocker {
    pub kind: String,
    pub probability: f64,
    pub detail: String,
}

/// The full prediction surface for one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub merge_time_hours: f64,
    pub merge_probability: f64,
    pub blocker_probability: f64,
    pub blockers: Vec<Blocker>,
    /// (feature name, importance share), descending. Empty for heuristics.
    pub feature_importance: Vec<(String, f64)>,
    /// In [0, 1]; grows with data availability, shrinks at extremes.
    pub confidence: f64,
    /// "model" or "heuristic".
    pub source: &'static str,
}

/// Predict from a trained model, or fall back to heuristics.
pub fn predict(model: Option<&LinearModel>, obs: &WorkflowObservation) -> Prediction {
    let vector = FeatureVector::from_observation(obs);
    let (merge_time_hours, feature_importance, source) = match model {
        Some(model) => {
            let hours = model.predict(&vector.values);
            let mut named: Vec<(String, f64)> = FEATURE_NAMES
                .iter()
                .map(|n| n.to_string())
                .zip(model.feature_importance())
                .collect();
            named.sort_by(|a, b| b.1.total_cmp(&a.1));
            named.truncate(5);
            (hours, named, "model")
        }
        None => (heuristic_hours(obs), Vec::new(), "heuristic"),
    };

    let blockers = detect_blockers(obs);
    let blocker_probability = blockers
        .iter()
        .map(|b| b.probability)
        .fold(0.0f64, |acc, p| acc.max(p));

    Prediction {
        merge_time_hours,
        merge_probability: merge_probability(obs),
        blocker_probability,
        blockers,
        feature_importance,
        confidence: confidence(model, obs),
        source,
    }
}

fn heuristic_hours(obs: &WorkflowObservation) -> f64 {
    let total_lines = (obs.lines_added + obs.lines_deleted) as f64;
    let mut hours = HEURISTIC_BASE_HOURS
        + total_lines / 100.0 * HEURISTIC_PER_100_LINES
        + obs.files as f64 / 10.0 * HEURISTIC_PER_10_FILES
        + obs.risk_score * HEURISTIC_RISK_STEP
        + obs.critical_issues as f64 * HEURISTIC_CRITICAL_ISSUE
        + obs.high_issues as f64 * HEURISTIC_HIGH_ISSUE;
    if obs.is_weekend {
        hours += HEURISTIC_WEEKEND;
    }
    if !obs.has_tests {
        hours += HEURISTIC_NO_TESTS;
    }
    if !obs.has_description {
        hours += HEURISTIC_NO_DESCRIPTION;
    }
    hours.clamp(MIN_HOURS, MAX_HOURS)
}

fn merge_probability(obs: &WorkflowObservation) -> f64 {
    let mut p = 0.85;
    p -= obs.critical_issues as f64 * 0.15;
    p -= obs.high_issues as f64 * 0.05;
    p -= obs.risk_score * 0.05;
    // Authors with a strong track record pull the estimate up.
    if obs.author_sample_count >= 5 {
        p = 0.5 * p + 0.5 * obs.author_merge_rate;
    }
    p.clamp(0.05, 0.99)
}

fn detect_blockers(obs: &WorkflowObservation) -> Vec<Blocker> {
    let mut blockers = Vec::new();
    let total_lines = obs.lines_added + obs.lines_deleted;

    if obs.critical_issues > 0 {
        blockers.push(Blocker {
            kind: "critical_issues".to_string(),
            probability: (0.5 + obs.critical_issues as f64 * 0.2).min(0.95),
            detail: format!("{} critical finding(s) outstanding", obs.critical_issues),
        });
    }
    if !obs.has_tests {
        blockers.push(Blocker {
            kind: "missing_tests".to_string(),
            probability: 0.45,
            detail: "no test changes detected".to_string(),
        });
    }
    if !obs.has_description {
        blockers.push(Blocker {
            kind: "missing_description".to_string(),
            probability: 0.25,
            detail: "PR body is empty".to_string(),
        });
    }
    if total_lines > 1000 || obs.files > 30 {
        blockers.push(Blocker {
            kind: "oversized_diff".to_string(),
            probability: 0.6,
            detail: format!("{total_lines} changed lines across {} files", obs.files),
        });
    }
    if obs.reviewer_availability < 0.3 {
        blockers.push(Blocker {
            kind: "reviewer_availability".to_string(),
            probability: 0.5,
            detail: "requested reviewers mostly inactive".to_string(),
        });
    }
    blockers
}

/// Confidence: more history means more trust; extreme feature values mean
/// the model is extrapolating, so trust drops.
fn confidence(model: Option<&LinearModel>, obs: &WorkflowObservation) -> f64 {
    let mut c: f64 = if model.is_some() { 0.5 } else { 0.3 };

    if obs.author_sample_count >= 5 {
        c += 0.1;
    }
    if obs.repo_sample_count >= 20 {
        c += 0.15;
    }
    if obs.reviewer_count >= 3 {
        c += 0.1;
    }
    if let Some(model) = model {
        if model.samples >= 50 {
            c += 0.1;
        }
    }

    let total_lines = obs.lines_added + obs.lines_deleted;
    if total_lines > 5000 || obs.files > 100 {
        c -= 0.2;
    }
    if obs.pr_age_hours > 24.0 * 30.0 {
        c -= 0.1;
    }

    c.clamp(0.05, 0.95)
}
