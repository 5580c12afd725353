//! Intent detection: what is this PR trying to do.
//!
//! Asks the LLM for a one-line classification; an unparseable answer falls
//! back to a keyword heuristic over the title so the pipeline never stalls
//! on a chatty model.

use regex::Regex;

use crate::agents::call_llm;
use crate::contract::{AgentContext, AgentOutput, AgentResult, AnalysisOutput, IntentOutput};

const KNOWN_INTENTS: [&str; 7] = [
    "feature", "bugfix", "refactor", "docs", "test", "chore", "release",
];

pub async fn run(ctx: &AgentContext, analysis: &AnalysisOutput) -> AgentResult<AgentOutput> {
    let file_list: Vec<&str> = analysis
        .files
        .iter()
        .take(30)
        .map(|f| f.path.as_str())
        .collect();
    let prompt = format!(
        "Title: {}\nBody ({} chars): {}\nChanged files:\n{}",
        analysis.title,
        analysis.description_length,
        ctx.bundle.pr.body.as_deref().unwrap_or("(empty)"),
        file_list.join("\n"),
    );

    let response = call_llm(ctx, "intent", prompt, 256).await?;
    let output = parse(&response.content)
        .unwrap_or_else(|| heuristic(&analysis.title, analysis.has_tests));
    Ok(AgentOutput::Intent(output))
}

fn parse(raw: &str) -> Option<IntentOutput> {
    let intent_re = Regex::new(r"(?mi)^INTENT:\s*(\w+)\s*$").unwrap();
    let rationale_re = Regex::new(r"(?mi)^RATIONALE:\s*(.+)$").unwrap();

    let intent = intent_re
        .captures(raw)?
        .get(1)?
        .as_str()
        .to_ascii_lowercase();
    if !KNOWN_INTENTS.contains(&intent.as_str()) {
        return None;
    }
    let rationale = rationale_re
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    Some(IntentOutput {
        intent,
        rationale,
        heuristic: false,
    })
}

/// Title-keyword fallback.
fn heuristic(title: &str, has_tests: bool) -> IntentOutput {
    let lowered = title.to_ascii_lowercase();
    let intent = if lowered.contains("fix") || lowered.contains("bug") {
        "bugfix"
    } else if lowered.contains("refactor") || lowered.contains("cleanup") {
        "refactor"
    } else if lowered.contains("doc") || lowered.contains("readme") {
        "docs"
    } else if lowered.contains("release") || lowered.contains("bump") {
        "release"
    } else if lowered.contains("test") || (has_tests && lowered.contains("coverage")) {
        "test"
    } else if lowered.contains("chore") || lowered.contains("deps") {
        "chore"
    } else {
        "feature"
    };
    IntentOutput {
        intent: intent.to_string(),
        rationale: "classified from title keywords".to_string(),
        heuristic: true,
    }
}
