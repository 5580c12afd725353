//! Review agent: context → prompt → LLM → policy → preference filter.
//!
//! Policy layer:
//! - strict block parsing (FILE/LINE/SEVERITY/CATEGORY/MESSAGE/FIX);
//! - anchors validated against the changed ranges of the named file,
//!   out-of-range blocks are dropped;
//! - overlap dedup keeps the more severe finding per (file, category);
//! - every survivor passes through the repository preference model and is
//!   suppressed below the confidence floor.

use regex::Regex;
use tracing::debug;

use preference_learning::{adjust, has_line_overlap, Finding, Severity};

use crate::agents::call_llm;
use crate::contract::{
    AgentContext, AgentOutput, AgentResult, ContextOutput, ReviewOutput, RiskOutput,
};

pub async fn run(
    ctx: &AgentContext,
    risk: &RiskOutput,
    context: &ContextOutput,
) -> AgentResult<AgentOutput> {
    if context.files.is_empty() {
        return Ok(AgentOutput::Review(ReviewOutput {
            findings: Vec::new(),
            suppressed: 0,
            raw_count: 0,
        }));
    }

    let prompt = build_prompt(risk, context);
    let response = call_llm(ctx, "review", prompt, 2048).await?;

    let raw_findings = parse_findings(&response.content, context);
    let raw_count = raw_findings.len();
    let deduped = dedup(raw_findings);

    let mut findings = Vec::new();
    let mut suppressed = 0;
    for finding in deduped {
        let adjusted = adjust(&ctx.preferences, &finding);
        if adjusted.suppressed {
            suppressed += 1;
            debug!(
                file = %finding.file,
                line = finding.line,
                "finding suppressed by preferences"
            );
        } else {
            findings.push(adjusted);
        }
    }

    debug!(
        raw = raw_count,
        published = findings.len(),
        suppressed,
        "review agent finished"
    );
    Ok(AgentOutput::Review(ReviewOutput {
        findings,
        suppressed,
        raw_count,
    }))
}

fn build_prompt(risk: &RiskOutput, context: &ContextOutput) -> String {
    let mut prompt = String::with_capacity(8_192);
    prompt.push_str(&format!(
        "Overall risk: {:?} ({} lines across {} files).\n\n",
        risk.level, risk.total_lines, risk.files
    ));
    for file in &context.files {
        prompt.push_str(&format!(
            "=== {} (changed lines {}) ===\n{}\n\n",
            file.path,
            file.changed_ranges
                .iter()
                .map(|(s, e)| format!("{s}-{e}"))
                .collect::<Vec<_>>()
                .join(", "),
            file.excerpt
        ));
    }
    prompt
}

/// Parse model output into validated findings. Invalid blocks are dropped.
pub fn parse_findings(raw: &str, context: &ContextOutput) -> Vec<Finding> {
    if raw.contains("NO_FINDINGS") {
        return Vec::new();
    }

    let file_re = Regex::new(r"(?mi)^FILE:\s*(.+?)\s*$").unwrap();
    let line_re = Regex::new(r"(?mi)^LINE:\s*(\d+)(?:\s*-\s*(\d+))?\s*$").unwrap();
    let severity_re =
        Regex::new(r"(?mi)^SEVERITY:\s*(CRITICAL|HIGH|MEDIUM|LOW|NITPICK)\s*$").unwrap();
    let category_re = Regex::new(r"(?mi)^CATEGORY:\s*([a-zA-Z_-]+)\s*$").unwrap();
    let message_re = Regex::new(r"(?ms)^MESSAGE:\s*(.+?)(?:\n[A-Z_]{3,}:|\z)").unwrap();
    let fix_re = Regex::new(r"(?mi)^FIX:\s*(.+)$").unwrap();

    let mut findings = Vec::new();
    for block in split_blocks(raw) {
        let Some(file) = file_re
            .captures(&block)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
        else {
            continue;
        };
        let Some(line_caps) = line_re.captures(&block) else {
            continue;
        };
        let Some(line) = line_caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
            continue;
        };
        let end_line = line_caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        if let Some(end) = end_line {
            if end < line {
                continue;
            }
        }

        // Anchors must land inside the file's changed ranges.
        let Some(file_ctx) = context.files.iter().find(|f| f.path == file) else {
            debug!(%file, "dropping finding for unknown file");
            continue;
        };
        let end = end_line.unwrap_or(line);
        let within = file_ctx
            .changed_ranges
            .iter()
            .any(|(s, e)| line >= *s && end <= *e);
        if !within {
            debug!(%file, line, "dropping finding with out-of-range anchor");
            continue;
        }

        let severity = severity_re
            .captures(&block)
            .and_then(|c| c.get(1))
            .and_then(|m| Severity::parse(m.as_str()))
            .unwrap_or(Severity::Low);
        let category = category_re
            .captures(&block)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_lowercase())
            .unwrap_or_else(|| "maintainability".to_string());
        let Some(message) = message_re
            .captures(&block)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|m| !m.is_empty())
        else {
            continue;
        };
        let quick_fix = fix_re
            .captures(&block)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string());

        let confidence = heuristic_confidence(&message, quick_fix.is_some(), severity);
        findings.push(Finding {
            file,
            line,
            end_line,
            severity,
            category,
            message,
            quick_fix,
            confidence,
        });
    }
    findings
}

fn split_blocks(raw: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    for line in raw.lines() {
        if line.trim_start().starts_with("FILE:") && !current.trim().is_empty() {
            blocks.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Confidence heuristic over the finding text.
fn heuristic_confidence(message: &str, has_fix: bool, severity: Severity) -> f32 {
    let mut score = 0.55f32;
    if has_fix {
        score += 0.18;
    }
    let lowered = message.to_ascii_lowercase();
    let code_ish = lowered.contains("```")
        || lowered.contains("::")
        || lowered.contains("()")
        || lowered.contains('[');
    if code_ish {
        score += 0.1;
    }
    if lowered.chars().any(|c| c.is_ascii_digit()) {
        score += 0.05;
    }
    for vague in ["maybe", "might", "perhaps", "seems", "i think", "could be"] {
        if lowered.contains(vague) {
            score -= 0.12;
            break;
        }
    }
    if matches!(severity, Severity::Critical | Severity::High) {
        score += 0.05;
    }
    score.clamp(0.0, 1.0)
}

/// Overlap dedup: same file + same category + overlapping lines collapse to
/// the more severe (then more confident) finding.
fn dedup(mut findings: Vec<Finding>) -> Vec<Finding> {
    // Strongest first: severity rank, then confidence.
    findings.sort_by(|a, b| {
        a.file
            .cmp(&b.file)
            .then(a.severity.cmp(&b.severity))
            .then(b.confidence.total_cmp(&a.confidence))
    });

    let mut kept: Vec<Finding> = Vec::new();
    for candidate in findings {
        let duplicate = kept.iter().any(|existing| {
            existing.file == candidate.file
                && existing.category == candidate.category
                && has_line_overlap(existing, &candidate)
        });
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::FileContext;

    fn context() -> ContextOutput {
        ContextOutput {
            files: vec![FileContext {
                path: "src/cache.rs".to_string(),
                language: Some("rust".to_string()),
                excerpt: String::new(),
                changed_ranges: vec![(10, 40), (80, 90)],
            }],
            truncated: false,
        }
    }

    const VALID_BLOCK: &str = "FILE: src/cache.rs\nLINE: 12-14\nSEVERITY: HIGH\n\
        CATEGORY: bug\nMESSAGE: Eviction never runs because the counter resets().\n\
        FIX: move the reset after the check\n";

    #[test]
    fn valid_blocks_parse_with_anchor_validation() {
        let findings = parse_findings(VALID_BLOCK, &context());
        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.file, "src/cache.rs");
        assert_eq!((f.line, f.end_line), (12, Some(14)));
        assert_eq!(f.severity, Severity::High);
        assert_eq!(f.category, "bug");
        assert!(f.quick_fix.is_some());
        assert!(f.confidence > 0.55);
    }

    #[test]
    fn out_of_range_and_unknown_file_blocks_drop() {
        let out_of_range = "FILE: src/cache.rs\nLINE: 50\nSEVERITY: LOW\nCATEGORY: style\nMESSAGE: x\n";
        assert!(parse_findings(out_of_range, &context()).is_empty());

        let unknown = "FILE: src/other.rs\nLINE: 12\nSEVERITY: LOW\nCATEGORY: style\nMESSAGE: x\n";
        assert!(parse_findings(unknown, &context()).is_empty());
    }

    #[test]
    fn no_findings_marker_short_circuits() {
        assert!(parse_findings("NO_FINDINGS", &context()).is_empty());
    }

    #[test]
    fn multiple_blocks_split_on_file_lines() {
        let raw = format!("{VALID_BLOCK}FILE: src/cache.rs\nLINE: 81\nSEVERITY: NITPICK\nCATEGORY: style\nMESSAGE: trailing whitespace\n");
        let findings = parse_findings(&raw, &context());
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn overlapping_same_category_findings_collapse() {
        let mk = |line, end, severity, confidence: f32| Finding {
            file: "src/cache.rs".to_string(),
            line,
            end_line: end,
            severity,
            category: "bug".to_string(),
            message: "m".to_string(),
            quick_fix: None,
            confidence,
        };
        let kept = dedup(vec![
            mk(12, Some(20), Severity::Low, 0.9),
            mk(15, Some(18), Severity::High, 0.6),
            mk(85, None, Severity::Low, 0.5),
        ]);
        assert_eq!(kept.len(), 2);
        // The severe finding won the overlap.
        assert!(kept.iter().any(|f| f.severity == Severity::High));
        assert!(!kept.iter().any(|f| f.line == 12));
    }

    #[test]
    fn vague_language_lowers_confidence() {
        let confident = heuristic_confidence("The index is off by one()", true, Severity::High);
        let vague = heuristic_confidence("This maybe seems wrong", false, Severity::Low);
        assert!(confident > vague);
    }
}
