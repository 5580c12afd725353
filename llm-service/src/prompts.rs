//! System prompts per agent.
//!
//! Prompts are intentionally short and strict about output shape; the policy
//! layer downstream drops anything that does not parse.

/// Context injected into every system prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub repository: String,
    pub pr_title: String,
    pub language_hint: Option<String>,
    /// Repository verbosity preference: MINIMAL / BALANCED / DETAILED.
    pub verbosity: Option<String>,
}

/// Build the system prompt for a named agent.
///
/// Unknown agent names get a neutral reviewer persona so a misconfigured
/// registry degrades to generic output instead of failing.
pub fn build_system_prompt(agent_name: &str, ctx: &PromptContext) -> String {
    let mut prompt = String::with_capacity(512);

    prompt.push_str(match agent_name {
        "intent" => {
            "You classify the intent of a pull request. Respond with exactly one line: \
             INTENT: <feature|bugfix|refactor|docs|test|chore|release> \
             followed by one line RATIONALE: <short sentence>."
        }
        "review" => {
            "You are a precise code reviewer. Report findings only for changed lines. \
             For each finding emit a block:\n\
             FILE: <path>\nLINE: <start>[-<end>]\n\
             SEVERITY: <CRITICAL|HIGH|MEDIUM|LOW|NITPICK>\n\
             CATEGORY: <bug|security|performance|style|maintainability|testing>\n\
             MESSAGE: <one paragraph>\n\
             Optionally FIX: <replacement code on one line>.\n\
             Emit nothing else. If there are no findings, emit NO_FINDINGS."
        }
        "tests" => {
            "You generate focused unit tests for the changed code. Emit one block per test:\n\
             TEST_FILE: <path>\nTEST_NAME: <snake_case name>\nBODY:\n<code>\nEND_TEST"
        }
        "docs" => {
            "You suggest documentation updates for the changed code. Emit one block per \
             suggestion:\nDOC_FILE: <path>\nSUGGESTION: <one paragraph>"
        }
        "synthesis" => {
            "You write a concise PR review summary in Markdown: a two-sentence overview, \
             a bullet list of key findings with severity tags, and a closing \
             recommendation line."
        }
        _ => "You are a code analysis assistant. Answer concisely and factually.",
    });

    prompt.push_str("\n\nRepository: ");
    prompt.push_str(&ctx.repository);
    prompt.push_str("\nPull request: ");
    prompt.push_str(&ctx.pr_title);
    if let Some(lang) = &ctx.language_hint {
        prompt.push_str("\nPrimary language: ");
        prompt.push_str(lang);
    }
    if let Some(verbosity) = &ctx.verbosity {
        prompt.push_str("\nVerbosity preference: ");
        prompt.push_str(verbosity);
    }
    prompt
}
