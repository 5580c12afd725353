//! Context builder: patch excerpts and legal anchor ranges per file.
//!
//! The review prompt only ever sees changed code; anchors outside the
//! changed ranges are rejected by the review policy downstream.

use regex::Regex;

use crate::contract::{
    AgentContext, AgentOutput, AgentResult, AnalysisOutput, ContextOutput, FileContext,
};

/// Rough prompt budget: excerpts beyond this are cut and the output flagged.
const MAX_EXCERPT_CHARS: usize = 4_000;
const MAX_FILES: usize = 25;

pub fn run(ctx: &AgentContext, analysis: &AnalysisOutput) -> AgentResult<AgentOutput> {
    let mut files = Vec::new();
    let mut truncated = false;

    for file in ctx.bundle.files.iter().take(MAX_FILES) {
        let Some(patch) = &file.patch else {
            continue; // binary or too-large file
        };
        let changed_ranges = changed_ranges(patch);
        if changed_ranges.is_empty() {
            continue;
        }

        let mut excerpt = patch.clone();
        if excerpt.len() > MAX_EXCERPT_CHARS {
            excerpt.truncate(MAX_EXCERPT_CHARS);
            truncated = true;
        }

        files.push(FileContext {
            path: file.path.clone(),
            language: language_of(&file.path),
            excerpt,
            changed_ranges,
        });
    }
    if analysis.changed_files as usize > MAX_FILES {
        truncated = true;
    }

    Ok(AgentOutput::Context(ContextOutput { files, truncated }))
}

/// New-file line ranges covered by a unified diff's hunks.
pub fn changed_ranges(patch: &str) -> Vec<(u32, u32)> {
    let hunk_re = Regex::new(r"(?m)^@@ -\d+(?:,\d+)? \+(\d+)(?:,(\d+))? @@").unwrap();
    let mut ranges = Vec::new();
    for caps in hunk_re.captures_iter(patch) {
        let start: u32 = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        let count: u32 = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(1);
        if start > 0 && count > 0 {
            ranges.push((start, start + count - 1));
        }
    }
    ranges
}

fn language_of(path: &str) -> Option<String> {
    let ext = path.rsplit_once('.')?.1;
    let lang = match ext {
        "rs" => "rust",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "py" => "python",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "kt" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "hpp" => "cpp",
        _ => return None,
    };
    Some(lang.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hunk_headers_yield_new_file_ranges() {
        let patch = "@@ -10,3 +12,5 @@ fn main() {\n+a\n+b\n context\n@@ -40 +50 @@\n+x\n";
        let ranges = changed_ranges(patch);
        assert_eq!(ranges, vec![(12, 16), (50, 50)]);
    }

    #[test]
    fn garbage_patches_yield_nothing() {
        assert!(changed_ranges("not a diff").is_empty());
        assert!(changed_ranges("").is_empty());
    }

    #[test]
    fn language_detection_covers_common_extensions() {
        assert_eq!(language_of("src/main.rs").as_deref(), Some("rust"));
        assert_eq!(language_of("web/app.tsx").as_deref(), Some("typescript"));
        assert_eq!(language_of("README.md"), None);
    }
}
