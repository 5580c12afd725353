//! The shared agent contract.
//!
//! Every agent is a pure function of `(context, inputs)` producing a tagged
//! [`AgentOutput`]; agents observe each other only through declared inputs.
//! Outputs are serializable records so the engine can persist and reuse
//! them across retries and resumes.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use git_publisher::types::PrBundle;
use llm_service::{LlmClient, LlmError, PromptContext};
use preference_learning::{AdjustedFinding, RepoPreferenceModel};
use storage::records::AgentRunStatus;

use crate::budget::TokenBudget;

/// Errors surfaced by agents.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl AgentError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Llm(e) if e.is_transient())
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Read-only context shared by all agents of one workflow.
pub struct AgentContext {
    pub workflow_id: String,
    pub repository_id: String,
    pub bundle: PrBundle,
    pub llm: Arc<LlmClient>,
    pub preferences: Arc<RepoPreferenceModel>,
    pub prompt_ctx: PromptContext,
    pub budget: Arc<TokenBudget>,
    pub cancel: CancellationToken,
}

/// Outputs of completed predecessors, keyed by agent name.
pub type AgentOutputs = HashMap<String, AgentOutput>;

/// Tagged output union; one variant per agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "agent", rename_all = "snake_case")]
pub enum AgentOutput {
    Analysis(AnalysisOutput),
    Intent(IntentOutput),
    Risk(RiskOutput),
    Context(ContextOutput),
    Review(ReviewOutput),
    Tests(TestsOutput),
    Docs(DocsOutput),
    Synthesis(SynthesisOutput),
}

/// Metadata extracted without any LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub changed_files: u64,
    pub total_additions: u64,
    pub total_deletions: u64,
    pub author_login: String,
    pub title: String,
    pub description_length: usize,
    pub has_tests: bool,
    /// Extension → file count, for language hints.
    pub languages: HashMap<String, u32>,
    pub files: Vec<FileSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
    pub path: String,
    pub status: String,
    pub additions: u64,
    pub deletions: u64,
}

/// What the PR is trying to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentOutput {
    /// feature | bugfix | refactor | docs | test | chore | release
    pub intent: String,
    pub rationale: String,
    /// True when the LLM answer did not parse and a heuristic filled in.
    pub heuristic: bool,
}

/// Deterministic risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn score(self) -> f64 {
        match self {
            Self::Low => 0.0,
            Self::Medium => 1.0,
            Self::High => 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskOutput {
    pub level: RiskLevel,
    pub total_lines: u64,
    pub files: u64,
    pub reasons: Vec<String>,
}

/// Code context assembled for the review prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextOutput {
    pub files: Vec<FileContext>,
    /// True when large diffs were cut to fit the prompt budget.
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContext {
    pub path: String,
    pub language: Option<String>,
    pub excerpt: String,
    /// New-file line ranges that are legal anchor targets.
    pub changed_ranges: Vec<(u32, u32)>,
}

/// Review findings after preference adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutput {
    pub findings: Vec<AdjustedFinding>,
    pub suppressed: usize,
    /// Parsed finding count before adjustment/dedup.
    pub raw_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedTest {
    pub file: String,
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestsOutput {
    pub tests: Vec<GeneratedTest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocSuggestion {
    pub file: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsOutput {
    pub suggestions: Vec<DocSuggestion>,
}

/// The summary comment, built from whatever subset of agents succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub markdown: String,
    pub finding_count: usize,
    pub risk_level: Option<RiskLevel>,
    /// Agents that contributed nothing (failed/skipped upstream).
    pub missing_inputs: Vec<String>,
}

/// Result of one agent execution, engine-persistable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub agent_name: String,
    pub status: AgentRunStatus,
    pub output: Option<AgentOutput>,
    pub error: Option<String>,
    pub latency_ms: Option<u64>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl AgentRunResult {
    pub fn skipped(agent_name: &str, reason: &str) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            status: AgentRunStatus::Skipped,
            output: None,
            error: Some(reason.to_string()),
            latency_ms: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Progress notifications for the realtime layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    Started { agent_name: String },
    Finished { agent_name: String, status: AgentRunStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_round_trip_through_json() {
        let output = AgentOutput::Risk(RiskOutput {
            level: RiskLevel::Medium,
            total_lines: 150,
            files: 8,
            reasons: vec!["150 changed lines".to_string()],
        });
        let value = serde_json::to_value(&output).expect("serialize");
        assert_eq!(value["agent"], "risk");
        let back: AgentOutput = serde_json::from_value(value).expect("deserialize");
        assert!(matches!(
            back,
            AgentOutput::Risk(RiskOutput { level: RiskLevel::Medium, .. })
        ));
    }

    #[test]
    fn risk_scores_are_monotone() {
        assert!(RiskLevel::Low.score() < RiskLevel::Medium.score());
        assert!(RiskLevel::Medium.score() < RiskLevel::High.score());
    }
}
