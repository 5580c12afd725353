//! Metadata extractor: files, sizes, author, PR body. No LLM involved.

use std::collections::HashMap;

use crate::contract::{AgentContext, AgentOutput, AgentResult, AnalysisOutput, FileSummary};

pub async fn run(ctx: &AgentContext) -> AgentResult<AgentOutput> {
    let bundle = &ctx.bundle;

    let mut languages: HashMap<String, u32> = HashMap::new();
    let mut total_additions = 0;
    let mut total_deletions = 0;
    let mut has_tests = false;
    let mut files = Vec::with_capacity(bundle.files.len());

    for file in &bundle.files {
        total_additions += file.additions;
        total_deletions += file.deletions;
        if is_test_path(&file.path) {
            has_tests = true;
        }
        if let Some(ext) = extension(&file.path) {
            *languages.entry(ext.to_string()).or_insert(0) += 1;
        }
        files.push(FileSummary {
            path: file.path.clone(),
            status: format!("{:?}", file.status).to_lowercase(),
            additions: file.additions,
            deletions: file.deletions,
        });
    }

    Ok(AgentOutput::Analysis(AnalysisOutput {
        changed_files: bundle.files.len() as u64,
        total_additions,
        total_deletions,
        author_login: bundle.pr.author_login.clone(),
        title: bundle.pr.title.clone(),
        description_length: bundle.pr.body.as_deref().map(str::len).unwrap_or(0),
        has_tests,
        languages,
        files,
    }))
}

fn is_test_path(path: &str) -> bool {
    let lowered = path.to_ascii_lowercase();
    lowered.contains("test")
        || lowered.contains("spec")
        || lowered.starts_with("tests/")
        || lowered.contains("/tests/")
}

fn extension(path: &str) -> Option<&str> {
    path.rsplit_once('.').map(|(_, ext)| ext).filter(|ext| !ext.contains('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_recognized() {
        assert!(is_test_path("tests/integration.rs"));
        assert!(is_test_path("src/foo_test.go"));
        assert!(is_test_path("src/components/Button.spec.tsx"));
        assert!(!is_test_path("src/main.rs"));
    }

    #[test]
    fn extensions_ignore_directories_with_dots() {
        assert_eq!(extension("src/main.rs"), Some("rs"));
        assert_eq!(extension("a.b/file"), None);
        assert_eq!(extension("Makefile"), None);
    }
}
