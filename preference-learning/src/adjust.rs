//! Preference adjustment for review findings.
//!
//! Applies, in order: custom rules (which override everything), the learned
//! category weight, the acceptance-rate factor, and ignored patterns. The
//! adjustment is idempotent: it computes from the finding's *original*
//! confidence carried alongside, so adjusting twice equals adjusting once.

use serde::{Deserialize, Serialize};

use crate::finding::Finding;
use crate::model::{RepoPreferenceModel, RuleAction};

/// Findings below this adjusted confidence are suppressed.
pub const SUPPRESS_BELOW: f32 = 0.3;

/// A finding after preference adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustedFinding {
    pub finding: Finding,
    /// Confidence before any adjustment; kept so re-adjusting is a no-op.
    pub original_confidence: f32,
    pub suppressed: bool,
    /// Human-readable explanation when an adjustment applied.
    pub explanation: Option<String>,
}

/// Apply the repository model to one finding.
pub fn adjust(model: &RepoPreferenceModel, finding: &Finding) -> AdjustedFinding {
    adjust_from(model, finding, finding.confidence)
}

/// Re-apply to an already adjusted finding (idempotent path).
pub fn adjust_existing(model: &RepoPreferenceModel, prior: &AdjustedFinding) -> AdjustedFinding {
    let mut original = prior.finding.clone();
    original.confidence = prior.original_confidence;
    adjust_from(model, &original, prior.original_confidence)
}

fn adjust_from(
    model: &RepoPreferenceModel,
    finding: &Finding,
    original_confidence: f32,
) -> AdjustedFinding {
    let mut out = finding.clone();
    out.confidence = original_confidence;
    let mut notes: Vec<String> = Vec::new();

    // Custom rules win outright.
    let lowered = finding.message.to_ascii_lowercase();
    for rule in &model.custom_rules {
        if !lowered.contains(&rule.pattern.to_ascii_lowercase()) {
            continue;
        }
        match rule.action {
            RuleAction::NeverFlag => {
                return AdjustedFinding {
                    finding: out,
                    original_confidence,
                    suppressed: true,
                    explanation: Some(format!(
                        "suppressed by team rule \"{}\"",
                        rule.pattern
                    )),
                };
            }
            RuleAction::AlwaysFlag => {
                out.confidence = out.confidence.max(rule.confidence);
                return AdjustedFinding {
                    finding: out,
                    original_confidence,
                    suppressed: false,
                    explanation: Some(format!("kept by team rule \"{}\"", rule.pattern)),
                };
            }
            RuleAction::FlagWithSeverity => {
                if let Some(severity) = rule.severity {
                    out.severity = severity;
                }
                out.confidence = rule.confidence;
                let suppressed = out.confidence < SUPPRESS_BELOW;
                return AdjustedFinding {
                    finding: out,
                    original_confidence,
                    suppressed,
                    explanation: Some(format!(
                        "severity set by team rule \"{}\"",
                        rule.pattern
                    )),
                };
            }
        }
    }

    // Learned category weight.
    let weight = model.weight_for(&finding.category);
    if (weight - 1.0).abs() > f32::EPSILON {
        out.confidence *= weight;
        notes.push(format!(
            "category weight {:.2} for {}",
            weight, finding.category
        ));
    }

    // Acceptance-rate factor: teams that keep dismissing a (category,
    // severity) pair see its confidence cut.
    let rate = model.acceptance_for(&finding.rate_key());
    let rate_factor = if rate < 0.4 {
        0.5
    } else if rate < 0.6 {
        0.75
    } else {
        1.0
    };
    if rate_factor < 1.0 {
        out.confidence *= rate_factor;
        notes.push(format!(
            "acceptance rate {:.2} for {} → ×{:.2}",
            rate,
            finding.rate_key(),
            rate_factor
        ));
    }

    // Ignored patterns.
    if model
        .ignored_patterns
        .iter()
        .any(|p| lowered.contains(p.as_str()))
    {
        out.confidence *= 0.5;
        notes.push("matches an ignored pattern".to_string());
    }

    out.confidence = out.confidence.clamp(0.0, 1.0);
    let suppressed = out.confidence < SUPPRESS_BELOW;

    AdjustedFinding {
        finding: out,
        original_confidence,
        suppressed,
        explanation: if notes.is_empty() {
            None
        } else {
            Some(notes.join("; "))
        },
    }
}
