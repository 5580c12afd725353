//! Synthesis fan-in: the summary comment.
//!
//! Always runs, with whatever subset of inputs succeeded. The skeleton is
//! built programmatically so a summary exists even when every upstream LLM
//! call failed; the LLM only decorates it with an overview paragraph.

use tracing::debug;

use preference_learning::Severity;

use crate::agents::call_llm;
use crate::contract::{
    AgentContext, AgentOutput, AgentOutputs, AgentResult, SynthesisOutput,
};

pub async fn run(ctx: &AgentContext, inputs: &AgentOutputs) -> AgentResult<AgentOutput> {
    let analysis = match inputs.get("analysis") {
        Some(AgentOutput::Analysis(a)) => Some(a),
        _ => None,
    };
    let intent = match inputs.get("intent") {
        Some(AgentOutput::Intent(i)) => Some(i),
        _ => None,
    };
    let risk = match inputs.get("risk") {
        Some(AgentOutput::Risk(r)) => Some(r),
        _ => None,
    };
    let review = match inputs.get("review") {
        Some(AgentOutput::Review(r)) => Some(r),
        _ => None,
    };
    let tests = match inputs.get("tests") {
        Some(AgentOutput::Tests(t)) => Some(t),
        _ => None,
    };
    let docs = match inputs.get("docs") {
        Some(AgentOutput::Docs(d)) => Some(d),
        _ => None,
    };

    let mut missing_inputs = Vec::new();
    for (name, present) in [
        ("analysis", analysis.is_some()),
        ("intent", intent.is_some()),
        ("risk", risk.is_some()),
        ("review", review.is_some()),
        ("tests", tests.is_some()),
        ("docs", docs.is_some()),
    ] {
        if !present {
            missing_inputs.push(name.to_string());
        }
    }

    let mut markdown = String::with_capacity(2_048);
    markdown.push_str("## Automated review summary\n\n");

    // Optional LLM overview; skipped on exhausted budget, ignored on error.
    if !ctx.budget.exhausted() {
        let mut prompt = format!("PR: {}\n", ctx.bundle.pr.title);
        if let Some(intent) = intent {
            prompt.push_str(&format!("Intent: {} ({})\n", intent.intent, intent.rationale));
        }
        if let Some(risk) = risk {
            prompt.push_str(&format!("Risk: {:?}\n", risk.level));
        }
        if let Some(review) = review {
            prompt.push_str(&format!("Findings: {}\n", review.findings.len()));
        }
        match call_llm(ctx, "synthesis", prompt, 512).await {
            Ok(response) if !response.content.trim().is_empty() => {
                markdown.push_str(response.content.trim());
                markdown.push_str("\n\n");
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "synthesis overview skipped"),
        }
    }

    if let Some(analysis) = analysis {
        markdown.push_str(&format!(
            "**Scope:** {} file(s), +{} / −{} lines by @{}.\n",
            analysis.changed_files,
            analysis.total_additions,
            analysis.total_deletions,
            analysis.author_login
        ));
    }
    if let Some(intent) = intent {
        markdown.push_str(&format!("**Intent:** {}.\n", intent.intent));
    }
    if let Some(risk) = risk {
        markdown.push_str(&format!("**Risk:** {:?}", risk.level));
        if !risk.reasons.is_empty() {
            markdown.push_str(&format!(" ({})", risk.reasons.join(", ")));
        }
        markdown.push_str(".\n");
    }
    markdown.push('\n');

    let finding_count = review.map(|r| r.findings.len()).unwrap_or(0);
    match review {
        Some(review) if !review.findings.is_empty() => {
            markdown.push_str("### Findings\n\n");
            let mut sorted: Vec<_> = review.findings.iter().collect();
            sorted.sort_by_key(|a| a.finding.severity);
            for adjusted in sorted {
                let f = &adjusted.finding;
                markdown.push_str(&format!(
                    "- `{}` **{}:{}**: {}\n",
                    severity_tag(f.severity),
                    f.file,
                    f.line,
                    f.message
                ));
            }
            if review.suppressed > 0 {
                markdown.push_str(&format!(
                    "\n_{} low-confidence finding(s) suppressed by team preferences._\n",
                    review.suppressed
                ));
            }
            markdown.push('\n');
        }
        Some(_) => markdown.push_str("No findings on the changed lines. \u{2705}\n\n"),
        None => markdown.push_str("_Review stage did not complete; findings unavailable._\n\n"),
    }

    if let Some(tests) = tests {
        if !tests.tests.is_empty() {
            markdown.push_str(&format!(
                "**Suggested tests:** {} (see generated-test artifacts).\n",
                tests.tests.len()
            ));
        }
    }
    if let Some(docs) = docs {
        if !docs.suggestions.is_empty() {
            markdown.push_str(&format!(
                "**Documentation suggestions:** {}.\n",
                docs.suggestions.len()
            ));
        }
    }
    if !missing_inputs.is_empty() {
        markdown.push_str(&format!(
            "\n_Partial results: {} stage(s) unavailable ({})._\n",
            missing_inputs.len(),
            missing_inputs.join(", ")
        ));
    }

    Ok(AgentOutput::Synthesis(SynthesisOutput {
        markdown,
        finding_count,
        risk_level: risk.map(|r| r.level),
        missing_inputs,
    }))
}

fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "CRITICAL",
        Severity::High => "HIGH",
        Severity::Medium => "MEDIUM",
        Severity::Low => "LOW",
        Severity::Nitpick => "NIT",
    }
}
