//! Deterministic risk classification.
//!
//! `totalLines = additions + deletions`; high iff `totalLines > 500 ∨
//! files > 20`; medium iff `totalLines > 100 ∨ files > 10` (and not high);
//! else low.

use crate::contract::{AgentOutput, AgentResult, AnalysisOutput, RiskLevel, RiskOutput};

pub fn run(analysis: &AnalysisOutput) -> AgentResult<AgentOutput> {
    Ok(AgentOutput::Risk(classify(
        analysis.total_additions,
        analysis.total_deletions,
        analysis.changed_files,
    )))
}

/// Pure classification over diff stats.
pub fn classify(additions: u64, deletions: u64, files: u64) -> RiskOutput {
    let total_lines = additions + deletions;
    let mut reasons = Vec::new();

    let level = if total_lines > 500 || files > 20 {
        if total_lines > 500 {
            reasons.push(format!("{total_lines} changed lines"));
        }
        if files > 20 {
            reasons.push(format!("{files} files touched"));
        }
        RiskLevel::High
    } else if total_lines > 100 || files > 10 {
        if total_lines > 100 {
            reasons.push(format!("{total_lines} changed lines"));
        }
        if files > 10 {
            reasons.push(format!("{files} files touched"));
        }
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    RiskOutput {
        level,
        total_lines,
        files,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_diffs_are_low() {
        let risk = classify(50, 10, 3);
        assert_eq!(risk.level, RiskLevel::Low);
        assert!(risk.reasons.is_empty());
    }

    #[test]
    fn midsize_diffs_are_medium() {
        let risk = classify(100, 50, 8);
        assert_eq!(risk.level, RiskLevel::Medium);
        assert_eq!(risk.total_lines, 150);
    }

    #[test]
    fn big_diffs_are_high() {
        let risk = classify(400, 200, 25);
        assert_eq!(risk.level, RiskLevel::High);
        assert_eq!(risk.reasons.len(), 2);
    }

    #[test]
    fn thresholds_are_exclusive() {
        // Exactly at a boundary stays below it.
        assert_eq!(classify(50, 50, 10).level, RiskLevel::Low);
        assert_eq!(classify(250, 250, 1).level, RiskLevel::Medium);
        assert_eq!(classify(0, 0, 21).level, RiskLevel::High);
        assert_eq!(classify(0, 0, 11).level, RiskLevel::Medium);
    }
}
