//! Build a predictive-health observation out of a finished workflow.

use chrono::{Datelike, TimeZone, Timelike, Utc, Weekday};

use orchestrator::contract::AgentOutput;
use predictive_health::WorkflowObservation;
use preference_learning::Severity;
use storage::records::{AgentRunRecord, WorkflowRecord};

/// Assemble the feature observation from persisted agent outputs.
///
/// Missing outputs degrade to neutral defaults; the observation must exist
/// even for workflows whose pipeline partially failed.
pub fn from_runs(workflow: &WorkflowRecord, runs: &[AgentRunRecord]) -> WorkflowObservation {
    let mut files = 0;
    let mut lines_added = 0;
    let mut lines_deleted = 0;
    let mut has_tests = false;
    let mut has_description = false;
    let mut risk_score = 0.0;
    let mut critical_issues = 0;
    let mut high_issues = 0;

    for run in runs {
        let Some(raw) = &run.output else { continue };
        let Ok(output) = serde_json::from_value::<AgentOutput>(raw.clone()) else {
            continue;
        };
        match output {
            AgentOutput::Analysis(a) => {
                files = a.changed_files;
                lines_added = a.total_additions;
                lines_deleted = a.total_deletions;
                has_tests = a.has_tests;
                has_description = a.description_length > 0;
            }
            AgentOutput::Risk(r) => {
                risk_score = r.level.score();
            }
            AgentOutput::Review(r) => {
                for adjusted in &r.findings {
                    match adjusted.finding.severity {
                        Severity::Critical => critical_issues += 1,
                        Severity::High => high_issues += 1,
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    let created = Utc
        .timestamp_millis_opt(workflow.created_at)
        .single()
        .unwrap_or_else(Utc::now);
    let completed_ms = workflow.completed_at.unwrap_or_else(storage::now_ms);
    let pr_age_hours = ((completed_ms - workflow.created_at).max(0)) as f64 / 3_600_000.0;

    WorkflowObservation {
        files,
        lines_added,
        lines_deleted,
        risk_score,
        critical_issues,
        high_issues,
        pr_age_hours,
        is_weekend: matches!(created.weekday(), Weekday::Sat | Weekday::Sun),
        hour_of_day: created.hour() as u8,
        // History aggregates come from the analytics store when present;
        // neutral priors otherwise.
        author_merge_rate: 0.5,
        author_avg_merge_time_hours: 24.0,
        repo_avg_merge_time_hours: 24.0,
        repo_avg_review_latency_minutes: 120.0,
        has_tests,
        has_description,
        reviewer_availability: 0.5,
        author_sample_count: 0,
        repo_sample_count: 0,
        reviewer_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator::contract::{AnalysisOutput, RiskLevel, RiskOutput};
    use storage::records::{AgentRunStatus, WorkflowStatus};

    fn workflow() -> WorkflowRecord {
        WorkflowRecord {
            id: "w1".to_string(),
            repository_id: "acme/widgets".to_string(),
            pr_number: 7,
            head_sha: "a".repeat(40),
            base_sha: "b".repeat(40),
            author_login: "octocat".to_string(),
            status: WorkflowStatus::Completed,
            attempt: 0,
            trigger_event_id: "evt".to_string(),
            created_at: storage::now_ms() - 7_200_000,
            started_at: None,
            completed_at: Some(storage::now_ms()),
            checkpoint_at: storage::now_ms(),
        }
    }

    fn run_with(output: AgentOutput) -> AgentRunRecord {
        AgentRunRecord {
            id: "r".to_string(),
            workflow_id: "w1".to_string(),
            agent_name: "x".to_string(),
            status: AgentRunStatus::Succeeded,
            started_at: None,
            finished_at: None,
            latency_ms: None,
            error: None,
            output: Some(serde_json::to_value(&output).unwrap()),
        }
    }

    #[test]
    fn observation_reads_analysis_and_risk() {
        let runs = vec![
            run_with(AgentOutput::Analysis(AnalysisOutput {
                changed_files: 6,
                total_additions: 300,
                total_deletions: 40,
                author_login: "octocat".to_string(),
                title: "t".to_string(),
                description_length: 50,
                has_tests: true,
                languages: Default::default(),
                files: vec![],
            })),
            run_with(AgentOutput::Risk(RiskOutput {
                level: RiskLevel::High,
                total_lines: 340,
                files: 6,
                reasons: vec![],
            })),
        ];

        let obs = from_runs(&workflow(), &runs);
        assert_eq!(obs.files, 6);
        assert_eq!(obs.lines_added, 300);
        assert!(obs.has_tests);
        assert!(obs.has_description);
        assert!((obs.risk_score - 2.0).abs() < 1e-9);
        assert!(obs.pr_age_hours >= 2.0);
    }

    #[test]
    fn empty_runs_yield_neutral_observation() {
        let obs = from_runs(&workflow(), &[]);
        assert_eq!(obs.files, 0);
        assert!(!obs.has_tests);
        assert!((obs.author_merge_rate - 0.5).abs() < 1e-9);
    }
}
