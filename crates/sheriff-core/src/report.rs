//! Aggregation of every analyzer's findings into one triage report.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{BuildResult, CommitId, Project, SheriffResult, TaskResult};

/// A task of one project, as listed in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub project: String,
    pub task: String,
    pub name: String,
    pub web_url: String,
}

/// Downstream tasks of one project still failing after retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamBreakage {
    pub project: String,
    pub tasks: Vec<TaskRef>,
    /// Distinct culprits over all tasks; empty when bisection found none.
    pub culprits: Vec<CommitId>,
}

/// A project whose analysis ended in an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisFailure {
    pub project: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageReport {
    pub generated_at: DateTime<Utc>,
    pub flaky_main: Vec<TaskRef>,
    pub flaky_downstream: Vec<TaskRef>,
    pub broken_main: Vec<TaskRef>,
    pub broken_downstream: Vec<DownstreamBreakage>,
    pub broken_by_infra: Vec<String>,
    pub failures: Vec<AnalysisFailure>,
    /// Full per-project records, in analysis order.
    pub projects: Vec<Project>,
}

impl TriageReport {
    pub fn build(projects: Vec<Project>, failures: Vec<AnalysisFailure>) -> Self {
        let mut report = Self {
            generated_at: Utc::now(),
            flaky_main: Vec::new(),
            flaky_downstream: Vec::new(),
            broken_main: Vec::new(),
            broken_downstream: Vec::new(),
            broken_by_infra: Vec::new(),
            failures,
            projects: Vec::new(),
        };

        for project in &projects {
            if project.broken_by_infra {
                report.broken_by_infra.push(project.name.clone());
            }
            report
                .flaky_main
                .extend(task_refs(&project.name, &project.main_result, |t| t.flaky));
            report.flaky_downstream.extend(task_refs(
                &project.name,
                &project.downstream_result,
                |t| t.flaky,
            ));
            report
                .broken_main
                .extend(task_refs(&project.name, &project.main_result, |t| t.broken));

            let broken: Vec<TaskRef> =
                task_refs(&project.name, &project.downstream_result, |t| t.broken).collect();
            if !broken.is_empty() {
                let culprits: BTreeSet<CommitId> = project
                    .downstream_result
                    .broken_tasks()
                    .filter_map(|(_, t)| t.culprit.clone())
                    .collect();
                report.broken_downstream.push(DownstreamBreakage {
                    project: project.name.clone(),
                    tasks: broken,
                    culprits: culprits.into_iter().collect(),
                });
            }
        }
        report.projects = projects;
        report
    }

    /// Nothing flaky, nothing broken, no failed analysis.
    pub fn is_clean(&self) -> bool {
        self.flaky_main.is_empty()
            && self.flaky_downstream.is_empty()
            && self.broken_main.is_empty()
            && self.broken_downstream.is_empty()
            && self.broken_by_infra.is_empty()
            && self.failures.is_empty()
    }

    /// Every culprit across all projects.
    pub fn culprits(&self) -> BTreeSet<&CommitId> {
        self.broken_downstream
            .iter()
            .flat_map(|b| b.culprits.iter())
            .collect()
    }

    pub fn log_summary(&self) {
        info!(
            projects = self.projects.len(),
            flaky_main = self.flaky_main.len(),
            flaky_downstream = self.flaky_downstream.len(),
            broken_main = self.broken_main.len(),
            broken_downstream = self.broken_downstream.len(),
            broken_by_infra = self.broken_by_infra.len(),
            failures = self.failures.len(),
            "triage finished"
        );
        for breakage in &self.broken_downstream {
            let culprits: Vec<&str> = breakage.culprits.iter().map(CommitId::as_str).collect();
            warn!(
                project = %breakage.project,
                tasks = breakage.tasks.len(),
                culprits = ?culprits,
                "downstream breakage"
            );
        }
        for project in &self.broken_by_infra {
            warn!(project = %project, "broken by infra");
        }
        for failure in &self.failures {
            warn!(project = %failure.project, error = %failure.error, "analysis failed");
        }
    }

    pub fn to_json(&self) -> SheriffResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn task_refs<'a>(
    project: &'a str,
    result: &'a BuildResult,
    keep: impl Fn(&TaskResult) -> bool + 'a,
) -> impl Iterator<Item = TaskRef> + 'a {
    result
        .tasks
        .iter()
        .filter(move |(_, t)| keep(*t))
        .map(move |(task, t)| TaskRef {
            project: project.to_string(),
            task: task.clone(),
            name: t.name.clone(),
            web_url: t.web_url.clone(),
        })
}
