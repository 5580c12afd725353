//! Documentation suggestions for the changed surface.

use regex::Regex;

use crate::agents::call_llm;
use crate::contract::{
    AgentContext, AgentOutput, AgentResult, DocSuggestion, DocsOutput, ReviewOutput,
};

pub async fn run(ctx: &AgentContext, review: &ReviewOutput) -> AgentResult<AgentOutput> {
    let mut prompt = String::with_capacity(1_024);
    prompt.push_str("Changed files:\n");
    for file in ctx.bundle.files.iter().take(20) {
        prompt.push_str(&format!("- {}\n", file.path));
    }
    prompt.push_str(&format!(
        "\nPR title: {}\nPublished findings: {}\n",
        ctx.bundle.pr.title,
        review.findings.len()
    ));

    let response = call_llm(ctx, "docs", prompt, 1024).await?;
    Ok(AgentOutput::Docs(DocsOutput {
        suggestions: parse_suggestions(&response.content),
    }))
}

/// Parse DOC_FILE/SUGGESTION pairs.
pub fn parse_suggestions(raw: &str) -> Vec<DocSuggestion> {
    let block_re =
        Regex::new(r"(?m)^DOC_FILE:\s*(.+?)\s*\nSUGGESTION:\s*(.+)$").unwrap();
    block_re
        .captures_iter(raw)
        .filter_map(|caps| {
            let file = caps.get(1)?.as_str().trim().to_string();
            let suggestion = caps.get(2)?.as_str().trim().to_string();
            if file.is_empty() || suggestion.is_empty() {
                return None;
            }
            Some(DocSuggestion { file, suggestion })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_parse_and_chatter_is_ignored() {
        let raw = "Some preamble\nDOC_FILE: README.md\nSUGGESTION: document the new cache TTL flag\nmore chatter\n";
        let suggestions = parse_suggestions(raw);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].file, "README.md");
    }

    #[test]
    fn empty_fields_are_dropped() {
        assert!(parse_suggestions("DOC_FILE:\nSUGGESTION: x\n").is_empty());
    }
}
