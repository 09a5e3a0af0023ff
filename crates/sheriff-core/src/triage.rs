//! Triage entry point: one analyzer per project, all run concurrently.

use std::collections::BTreeSet;

use tokio::task::JoinSet;
use tracing::{error, info, info_span, instrument, Instrument};
use uuid::Uuid;

use crate::analyzer::{BuildInfoAnalyzer, TriageContext};
use crate::domain::{Project, ProjectConfig, SheriffError, SheriffResult};
use crate::extract::downstream_results_by_project;
use crate::metrics::METRICS;
use crate::report::{AnalysisFailure, TriageReport};
use crate::source::{BuildFilter, BuildRecord};

/// Runs triage over every registered project.
pub struct Sheriff {
    ctx: TriageContext,
    projects: Vec<ProjectConfig>,
}

impl Sheriff {
    pub fn new(ctx: TriageContext, projects: Vec<ProjectConfig>) -> Self {
        Self { ctx, projects }
    }

    /// Most recent finished downstream build on the mainline branch.
    pub async fn latest_downstream_build(&self) -> SheriffResult<BuildRecord> {
        let pipeline = &self.ctx.settings.downstream_pipeline;
        let builds = self
            .ctx
            .source
            .list_builds(pipeline, &BuildFilter::latest_finished(&self.ctx.settings.branch))
            .await?;
        builds
            .into_iter()
            .next()
            .ok_or_else(|| SheriffError::NoFinishedBuild {
                pipeline: pipeline.clone(),
            })
    }

    /// Triage the latest downstream build.
    #[instrument(skip(self), fields(run_id = %Uuid::new_v4()))]
    pub async fn triage(&self) -> SheriffResult<TriageReport> {
        let build = self.latest_downstream_build().await?;
        info!(build = build.number, commit = %build.commit, "triaging downstream build");
        Ok(self.triage_build(&build).await)
    }

    /// Analyze every registered project present in `build`.
    ///
    /// Worker errors and panics are collected into the report; they never
    /// stop sibling workers.
    pub async fn triage_build(&self, build: &BuildRecord) -> TriageReport {
        let mut downstream =
            downstream_results_by_project(build, &self.projects, &self.ctx.settings.runner_marker);

        let mut join_set = JoinSet::new();
        let mut pending = BTreeSet::new();
        for config in &self.projects {
            let Some(result) = downstream.remove(&config.name) else {
                continue;
            };
            let name = config.name.clone();
            pending.insert(name.clone());
            let analyzer = BuildInfoAnalyzer::new(config.clone(), result, self.ctx.clone());
            let span = info_span!("sheriff.project", project = %name);
            join_set.spawn(
                async move {
                    let outcome = analyzer.run_to_outcome().await;
                    (name, outcome)
                }
                .instrument(span),
            );
        }
        info!(workers = pending.len(), "analyzers started");

        let mut projects: Vec<Project> = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (name, outcome) = match joined {
                Ok(joined) => joined,
                Err(e) => {
                    error!(error = %e, "analysis worker aborted");
                    continue;
                }
            };
            pending.remove(&name);
            // An interrupted analysis still reports the tasks it classified.
            let (project, failure) = outcome.into_parts();
            if let Some(e) = failure {
                error!(project = %name, error = %e, "analysis failed");
                failures.push(AnalysisFailure {
                    project: name,
                    error: e.to_string(),
                });
            }
            projects.extend(project);
        }
        // Whatever never reported back panicked or was cancelled.
        failures.extend(pending.into_iter().map(|project| AnalysisFailure {
            project,
            error: "analysis worker panicked".to_string(),
        }));

        let order: Vec<&str> = self.projects.iter().map(|p| p.name.as_str()).collect();
        let rank = |name: &str| order.iter().position(|n| *n == name).unwrap_or(usize::MAX);
        projects.sort_by_key(|p| rank(&p.name));
        failures.sort_by_key(|f| rank(&f.project));

        METRICS.flush();
        let report = TriageReport::build(projects, failures);
        report.log_summary();
        report
    }
}
