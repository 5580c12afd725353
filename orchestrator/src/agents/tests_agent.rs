//! Test generation for review findings and changed code.

use regex::Regex;

use crate::agents::call_llm;
use crate::contract::{
    AgentContext, AgentOutput, AgentResult, GeneratedTest, ReviewOutput, TestsOutput,
};

pub async fn run(ctx: &AgentContext, review: &ReviewOutput) -> AgentResult<AgentOutput> {
    let mut prompt = String::with_capacity(2_048);
    prompt.push_str("Changed files:\n");
    for file in ctx.bundle.files.iter().take(20) {
        prompt.push_str(&format!("- {}\n", file.path));
    }
    if !review.findings.is_empty() {
        prompt.push_str("\nFindings worth regression tests:\n");
        for adjusted in review.findings.iter().take(10) {
            let f = &adjusted.finding;
            prompt.push_str(&format!("- {}:{} {}\n", f.file, f.line, f.message));
        }
    }

    let response = call_llm(ctx, "tests", prompt, 2048).await?;
    Ok(AgentOutput::Tests(TestsOutput {
        tests: parse_tests(&response.content),
    }))
}

/// Parse TEST_FILE/TEST_NAME/BODY blocks; malformed blocks are dropped.
pub fn parse_tests(raw: &str) -> Vec<GeneratedTest> {
    let block_re = Regex::new(
        r"(?ms)^TEST_FILE:\s*(.+?)\s*\nTEST_NAME:\s*(.+?)\s*\nBODY:\s*\n(.*?)\nEND_TEST",
    )
    .unwrap();

    block_re
        .captures_iter(raw)
        .filter_map(|caps| {
            let file = caps.get(1)?.as_str().trim().to_string();
            let name = caps.get(2)?.as_str().trim().to_string();
            let body = caps.get(3)?.as_str().trim_end().to_string();
            if file.is_empty() || name.is_empty() || body.is_empty() {
                return None;
            }
            Some(GeneratedTest { file, name, body })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_blocks_parse() {
        let raw = "TEST_FILE: tests/cache.rs\nTEST_NAME: eviction_runs_once\nBODY:\n#[test]\nfn eviction_runs_once() {}\nEND_TEST\n";
        let tests = parse_tests(raw);
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].name, "eviction_runs_once");
        assert!(tests[0].body.contains("#[test]"));
    }

    #[test]
    fn chatter_without_blocks_yields_nothing() {
        assert!(parse_tests("Here are some ideas for tests...").is_empty());
    }

    #[test]
    fn multiple_blocks_all_parse() {
        let raw = "TEST_FILE: a.rs\nTEST_NAME: one\nBODY:\nfn one() {}\nEND_TEST\nTEST_FILE: b.rs\nTEST_NAME: two\nBODY:\nfn two() {}\nEND_TEST\n";
        assert_eq!(parse_tests(raw).len(), 2);
    }
}
