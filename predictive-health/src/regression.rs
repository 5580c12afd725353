//! Per-repository linear regression via gradient descent.
//!
//! Features are z-scored before descent (100 iterations, lr 0.01); the raw
//! feature scales in this domain (line counts vs. ratios) diverge by four
//! orders of magnitude and unstandardized descent does not converge.
//! Predictions are bounded to [1, 168] hours.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::features::Standardization;

const ITERATIONS: usize = 100;
const LEARNING_RATE: f64 = 0.01;

/// Prediction bounds in hours (one hour .. one week).
pub const MIN_HOURS: f64 = 1.0;
pub const MAX_HOURS: f64 = 168.0;

/// Trained weights plus the standardization they were fit under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub standardization: Standardization,
    pub samples: usize,
}

impl LinearModel {
    /// Fit on `(features, target_hours)` pairs.
    ///
    /// Returns `None` with fewer than two samples; a single observation
    /// cannot constrain a line.
    pub fn train(samples: &[Vec<f64>], targets: &[f64]) -> Option<Self> {
        if samples.len() < 2 || samples.len() != targets.len() {
            return None;
        }
        let width = samples[0].len();
        let standardization = Standardization::fit(samples);
        let standardized: Vec<Vec<f64>> =
            samples.iter().map(|row| standardization.apply(row)).collect();

        let n = samples.len() as f64;
        let mut weights = vec![0.0; width];
        let mut bias = targets.iter().sum::<f64>() / n;

        for iteration in 0..ITERATIONS {
            let mut grad_w = vec![0.0; width];
            let mut grad_b = 0.0;

            for (row, target) in standardized.iter().zip(targets) {
                let predicted = dot(&weights, row) + bias;
                let error = predicted - target;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += error * v / n;
                }
                grad_b += error / n;
            }

            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= LEARNING_RATE * g;
            }
            bias -= LEARNING_RATE * grad_b;

            if iteration == ITERATIONS - 1 {
                debug!(iteration, bias, "gradient descent finished");
            }
        }

        Some(Self {
            weights,
            bias,
            standardization,
            samples: samples.len(),
        })
    }

    /// Predict hours for one raw feature row, clamped to [1, 168].
    pub fn predict(&self, features: &[f64]) -> f64 {
        let standardized = self.standardization.apply(features);
        (dot(&self.weights, &standardized) + self.bias).clamp(MIN_HOURS, MAX_HOURS)
    }

    /// Absolute weight per feature, as a share of the total (importance).
    pub fn feature_importance(&self) -> Vec<f64> {
        let total: f64 = self.weights.iter().map(|w| w.abs()).sum();
        if total < 1e-12 {
            return vec![0.0; self.weights.len()];
        }
        self.weights.iter().map(|w| w.abs() / total).collect()
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_degenerate_training_sets() {
        assert!(LinearModel::train(&[], &[]).is_none());
        assert!(LinearModel::train(&[vec![1.0]], &[5.0]).is_none());
        assert!(LinearModel::train(&[vec![1.0], vec![2.0]], &[5.0]).is_none());
    }

    #[test]
    fn learns_a_monotone_relationship() {
        // Larger PRs take longer; sizes span realistic magnitudes.
        let samples: Vec<Vec<f64>> = (1..=30)
            .map(|i| vec![i as f64 * 100.0, (i % 3) as f64])
            .collect();
        let targets: Vec<f64> = (1..=30).map(|i| 2.0 + i as f64).collect();

        let model = LinearModel::train(&samples, &targets).expect("train");
        let small = model.predict(&[100.0, 1.0]);
        let large = model.predict(&[3000.0, 1.0]);
        assert!(
            large > small,
            "large PR predicted {large} ≤ small {small}"
        );
    }

    #[test]
    fn predictions_are_bounded() {
        let samples = vec![vec![1.0], vec![2.0], vec![3.0]];
        let targets = vec![500.0, 600.0, 700.0];

        let model = LinearModel::train(&samples, &targets).expect("train");
        let p = model.predict(&[2.0]);
        assert!((MIN_HOURS..=MAX_HOURS).contains(&p));

        let low = LinearModel::train(&samples, &[0.01, 0.02, 0.03]).expect("train");
        assert!(low.predict(&[2.0]) >= MIN_HOURS);
    }

    #[test]
    fn importance_sums_to_one_when_weights_exist() {
        let samples: Vec<Vec<f64>> = (1..=20).map(|i| vec![i as f64, 20.0 - i as f64]).collect();
        let targets: Vec<f64> = (1..=20).map(|i| i as f64).collect();

        let model = LinearModel::train(&samples, &targets).expect("train");
        let importance = model.feature_importance();
        let sum: f64 = importance.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9 || sum == 0.0);
    }
}
