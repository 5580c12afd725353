//! Finding model shared between the review agent and the learning store.

use serde::{Deserialize, Serialize};

/// Finding severity, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Nitpick,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Nitpick => "NITPICK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Self::Critical,
            "HIGH" => Self::High,
            "MEDIUM" => Self::Medium,
            "LOW" => Self::Low,
            "NITPICK" => Self::Nitpick,
            _ => return None,
        })
    }
}

/// One review finding produced by the review agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub file: String,
    pub line: u32,
    pub end_line: Option<u32>,
    pub severity: Severity,
    /// Free-form category key, normalized to lowercase (e.g. "style", "bug").
    pub category: String,
    pub message: String,
    pub quick_fix: Option<String>,
    /// Model confidence in [0, 1] before preference adjustment.
    pub confidence: f32,
}

impl Finding {
    /// Key used for per-(category, severity) acceptance tracking.
    pub fn rate_key(&self) -> String {
        format!(
            "{}|{}",
            self.category.to_ascii_uppercase(),
            self.severity.as_str()
        )
    }
}

/// Line-range overlap between two findings: `a.start ≤ b.end ∧ b.start ≤ a.end`.
pub fn has_line_overlap(a: &Finding, b: &Finding) -> bool {
    let a_end = a.end_line.unwrap_or(a.line);
    let b_end = b.end_line.unwrap_or(b.line);
    a.line <= b_end && b.line <= a_end
}

/// Typed view of the decision `context` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionContext {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub category: String,
    pub severity: String,
    /// The AI-authored text the reviewer reacted to.
    pub snippet: Option<String>,
    pub language: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(line: u32, end_line: Option<u32>) -> Finding {
        Finding {
            file: "src/lib.rs".to_string(),
            line,
            end_line,
            severity: Severity::Low,
            category: "style".to_string(),
            message: "msg".to_string(),
            quick_fix: None,
            confidence: 0.5,
        }
    }

    #[test]
    fn overlap_is_symmetric_and_inclusive() {
        let a = finding(10, Some(20));
        let b = finding(20, Some(25));
        let c = finding(21, Some(25));

        assert!(has_line_overlap(&a, &b));
        assert!(has_line_overlap(&b, &a));
        assert!(!has_line_overlap(&a, &c));
        assert!(!has_line_overlap(&c, &a));
    }

    #[test]
    fn single_line_findings_overlap_themselves() {
        let a = finding(5, None);
        let b = finding(5, None);
        assert!(has_line_overlap(&a, &b));
        assert!(!has_line_overlap(&a, &finding(6, None)));
    }

    #[test]
    fn rate_key_uppercases_category() {
        let f = finding(1, None);
        assert_eq!(f.rate_key(), "STYLE|LOW");
    }

    #[test]
    fn severity_parse_is_case_insensitive() {
        assert_eq!(Severity::parse("critical"), Some(Severity::Critical));
        assert_eq!(Severity::parse("Nitpick"), Some(Severity::Nitpick));
        assert_eq!(Severity::parse("blocker"), None);
    }
}
