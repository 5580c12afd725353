//! Feature extraction for the predictive-health model.
//!
//! A fixed-width vector per workflow; ordering is part of the persisted
//! model contract, so new features append at the end.

use serde::{Deserialize, Serialize};

/// Number of features in [`FeatureVector::to_array`]'s output.
pub const FEATURE_COUNT: usize = 19;

/// Raw inputs observed when a workflow completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowObservation {
    pub files: u64,
    pub lines_added: u64,
    pub lines_deleted: u64,
    /// 0 = low, 1 = medium, 2 = high (risk agent output).
    pub risk_score: f64,
    pub critical_issues: u64,
    pub high_issues: u64,
    /// Hours between PR creation and workflow completion.
    pub pr_age_hours: f64,
    pub is_weekend: bool,
    pub hour_of_day: u8,
    /// Author's historical merge rate in [0, 1]; 0.5 when unknown.
    pub author_merge_rate: f64,
    pub author_avg_merge_time_hours: f64,
    pub repo_avg_merge_time_hours: f64,
    pub repo_avg_review_latency_minutes: f64,
    pub has_tests: bool,
    pub has_description: bool,
    /// Fraction of requested reviewers currently active, in [0, 1].
    pub reviewer_availability: f64,
    /// How much history backed the aggregates above.
    pub author_sample_count: u64,
    pub repo_sample_count: u64,
    pub reviewer_count: u64,
}

/// The model's feature view of one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f64>,
}

/// Stable feature names, index-aligned with [`FeatureVector::values`].
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "files",
    "lines_added",
    "lines_deleted",
    "risk_score",
    "critical_issues",
    "high_issues",
    "pr_age_hours",
    "is_weekend",
    "hour_of_day",
    "author_merge_rate",
    "author_avg_merge_time_hours",
    "repo_avg_merge_time_hours",
    "repo_avg_review_latency_minutes",
    "has_tests",
    "has_description",
    "reviewer_availability",
    "normalized_size",
    "normalized_complexity",
    "normalized_risk",
];

impl FeatureVector {
    /// Build the vector from a raw observation.
    pub fn from_observation(obs: &WorkflowObservation) -> Self {
        let total_lines = (obs.lines_added + obs.lines_deleted) as f64;
        // Saturating ratios keep extreme PRs from dominating descent.
        let normalized_size = (total_lines / 1000.0).min(1.0);
        let normalized_complexity = (obs.files as f64 / 50.0).min(1.0);
        let normalized_risk = (obs.risk_score / 2.0).min(1.0);

        let values = vec![
            obs.files as f64,
            obs.lines_added as f64,
            obs.lines_deleted as f64,
            obs.risk_score,
            obs.critical_issues as f64,
            obs.high_issues as f64,
            obs.pr_age_hours,
            if obs.is_weekend { 1.0 } else { 0.0 },
            obs.hour_of_day as f64,
            obs.author_merge_rate,
            obs.author_avg_merge_time_hours,
            obs.repo_avg_merge_time_hours,
            obs.repo_avg_review_latency_minutes,
            if obs.has_tests { 1.0 } else { 0.0 },
            if obs.has_description { 1.0 } else { 0.0 },
            obs.reviewer_availability,
            normalized_size,
            normalized_complexity,
            normalized_risk,
        ];
        debug_assert_eq!(values.len(), FEATURE_COUNT);
        Self { values }
    }
}

/// Column means and standard deviations for z-scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Standardization {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Standardization {
    /// Fit over a sample matrix; zero-variance columns get std 1 so they
    /// standardize to zero instead of dividing by zero.
    pub fn fit(samples: &[Vec<f64>]) -> Self {
        let n = samples.len().max(1) as f64;
        let width = samples.first().map(Vec::len).unwrap_or(0);

        let mut means = vec![0.0; width];
        for row in samples {
            for (i, v) in row.iter().enumerate() {
                means[i] += v / n;
            }
        }

        let mut stds = vec![0.0; width];
        for row in samples {
            for (i, v) in row.iter().enumerate() {
                stds[i] += (v - means[i]).powi(2) / n;
            }
        }
        for s in &mut stds {
            *s = s.sqrt();
            if *s < 1e-9 {
                *s = 1.0;
            }
        }

        Self { means, stds }
    }

    pub fn apply(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(i, v)| (v - self.means[i]) / self.stds[i])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation() -> WorkflowObservation {
        WorkflowObservation {
            files: 5,
            lines_added: 200,
            lines_deleted: 50,
            risk_score: 1.0,
            critical_issues: 0,
            high_issues: 2,
            pr_age_hours: 4.0,
            is_weekend: false,
            hour_of_day: 14,
            author_merge_rate: 0.8,
            author_avg_merge_time_hours: 12.0,
            repo_avg_merge_time_hours: 20.0,
            repo_avg_review_latency_minutes: 90.0,
            has_tests: true,
            has_description: true,
            reviewer_availability: 0.7,
            author_sample_count: 12,
            repo_sample_count: 40,
            reviewer_count: 3,
        }
    }

    #[test]
    fn vector_has_fixed_width_and_bounded_normals() {
        let v = FeatureVector::from_observation(&observation());
        assert_eq!(v.values.len(), FEATURE_COUNT);

        let size = v.values[16];
        let complexity = v.values[17];
        let risk = v.values[18];
        assert!((0.0..=1.0).contains(&size));
        assert!((0.0..=1.0).contains(&complexity));
        assert!((0.0..=1.0).contains(&risk));
        assert!((size - 0.25).abs() < 1e-9);
    }

    #[test]
    fn standardization_centers_columns() {
        let samples = vec![vec![1.0, 10.0], vec![3.0, 10.0], vec![5.0, 10.0]];
        let std = Standardization::fit(&samples);

        let centered = std.apply(&[3.0, 10.0]);
        assert!(centered[0].abs() < 1e-9);
        // Constant column standardizes to zero, no NaN.
        assert!(centered[1].abs() < 1e-9);
        assert!(centered.iter().all(|v| v.is_finite()));
    }
}
