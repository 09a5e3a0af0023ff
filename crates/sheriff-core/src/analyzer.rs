//! BuildInfoAnalyzer: per-project failure classification.
//!
//! The analyzer compares the project's own (main) build with its slice of the
//! downstream build and walks exactly one branch of the 2x2 state table:
//!
//! | main   | downstream | action                                         |
//! |--------|------------|------------------------------------------------|
//! | passed | passed     | record success                                 |
//! | failed | passed     | retry main, residual failures are the project's |
//! | passed | failed     | retry downstream, bisect residual failures      |
//! | failed | failed     | rebuild at last green commit to rule out infra  |

use std::sync::Arc;

use tracing::{info, warn};

use crate::bisect::{BisectScope, Bisector};
use crate::config::PipelineSettings;
use crate::domain::{
    BuildResult, BuildState, Project, ProjectConfig, SheriffError, SheriffResult, TaskResult,
};
use crate::extract;
use crate::metrics::METRICS;
use crate::retry::{retry_failed_tasks, RetriedTask};
use crate::source::{BuildFilter, BuildRecordSource, LastGreenCommitSource, TriggerRequest};
use crate::transcript::{ProgressSink, SuccessLog, Tone, Transcript};

const INFRA_BREAKAGE: &str =
    "Project failed at last green commit. This is probably caused by an infra change, please ask the CI maintainers to investigate.";

/// Collaborators shared by every analyzer of one triage run.
#[derive(Clone)]
pub struct TriageContext {
    pub source: Arc<dyn BuildRecordSource>,
    pub last_green: Arc<dyn LastGreenCommitSource>,
    pub bisector: Arc<dyn Bisector>,
    pub sink: Arc<dyn ProgressSink>,
    pub success_log: SuccessLog,
    pub settings: PipelineSettings,
}

/// How one analyzer ended.
#[derive(Debug)]
pub enum ProjectOutcome {
    Finished(Project),
    /// `project` is `None` when the main build could not be fetched.
    Interrupted {
        project: Option<Project>,
        error: SheriffError,
    },
}

impl ProjectOutcome {
    pub fn into_result(self) -> SheriffResult<Project> {
        match self {
            ProjectOutcome::Finished(project) => Ok(project),
            ProjectOutcome::Interrupted { error, .. } => Err(error),
        }
    }

    /// The project record, complete or partial, and the error that stopped it.
    pub fn into_parts(self) -> (Option<Project>, Option<SheriffError>) {
        match self {
            ProjectOutcome::Finished(project) => (Some(project), None),
            ProjectOutcome::Interrupted { project, error } => (project, Some(error)),
        }
    }
}

/// Analyzes one project; owns its [`Project`] record exclusively.
pub struct BuildInfoAnalyzer {
    config: ProjectConfig,
    downstream_result: BuildResult,
    ctx: TriageContext,
    transcript: Transcript,
}

impl BuildInfoAnalyzer {
    pub fn new(config: ProjectConfig, downstream_result: BuildResult, ctx: TriageContext) -> Self {
        let transcript = Transcript::new(
            config.name.clone(),
            config.pipeline_slug.clone(),
            Arc::clone(&ctx.sink),
        );
        Self {
            config,
            downstream_result,
            ctx,
            transcript,
        }
    }

    pub fn project_name(&self) -> &str {
        &self.config.name
    }

    /// Fetch the main build, classify, retry and bisect as needed.
    pub async fn run(self) -> SheriffResult<Project> {
        self.run_to_outcome().await.into_result()
    }

    /// Like [`run`](Self::run), but an error after the main build was fetched
    /// still hands back the project with every flag set so far.
    pub async fn run_to_outcome(self) -> ProjectOutcome {
        let main_result = match self.fetch_main_result().await {
            Ok(result) => result,
            Err(error) => {
                return ProjectOutcome::Interrupted {
                    project: None,
                    error,
                }
            }
        };
        let mut project = Project::new(
            self.config.name.clone(),
            self.config.pipeline_slug.clone(),
            main_result,
            self.downstream_result.clone(),
        );
        match self.analyze(&mut project).await {
            Ok(()) => ProjectOutcome::Finished(project),
            Err(error) => ProjectOutcome::Interrupted {
                project: Some(project),
                error,
            },
        }
    }

    async fn fetch_main_result(&self) -> SheriffResult<BuildResult> {
        let pipeline = &self.config.pipeline_slug;
        let builds = self
            .ctx
            .source
            .list_builds(pipeline, &BuildFilter::latest_finished(&self.ctx.settings.branch))
            .await?;
        let Some(record) = builds.into_iter().next() else {
            let err = SheriffError::NoFinishedBuild {
                pipeline: pipeline.clone(),
            };
            self.transcript.log(Tone::Serious, err.to_string()).await;
            return Err(err);
        };

        let last_green = self.ctx.last_green.last_green_commit(&self.config).await?;
        let result = extract::build_result(&record, &self.ctx.settings.runner_marker)
            .with_last_green_commit(last_green);
        info!(
            project = %self.config.name,
            build = result.build_number,
            state = %result.state(),
            "main build fetched"
        );
        Ok(result)
    }

    async fn analyze(&self, project: &mut Project) -> SheriffResult<()> {
        let main = project.main_result.state();
        let downstream = project.downstream_result.state();
        match (main, downstream) {
            (BuildState::Passed, BuildState::Passed) => {
                self.ctx
                    .success_log
                    .record(&project.name, "Main build: PASSED; Downstream build: PASSED")
                    .await;
                return Ok(());
            }
            (BuildState::Failed, BuildState::Passed) => {
                self.log(Tone::Fail, "Main build: FAILED").await;
                self.log(Tone::Passed, "Downstream build: PASSED").await;
                self.analyze_main(project).await?;
            }
            (BuildState::Passed, BuildState::Failed) => {
                self.log(Tone::Passed, "Main build: PASSED").await;
                self.log(Tone::Fail, "Downstream build: FAILED").await;
                self.analyze_downstream(project).await?;
            }
            (BuildState::Failed, BuildState::Failed) => {
                self.log(Tone::Fail, "Main build: FAILED").await;
                self.log(Tone::Fail, "Downstream build: FAILED").await;
                self.disambiguate(project).await?;
            }
        }
        self.log(Tone::Header, "Analyzing finished.").await;
        Ok(())
    }

    /// Both tracks failed: rule out the infrastructure before blaming code.
    async fn disambiguate(&self, project: &mut Project) -> SheriffResult<()> {
        let last_green = project
            .main_result
            .last_green_commit
            .clone()
            .ok_or_else(|| SheriffError::MissingLastGreenCommit {
                project: project.name.clone(),
            })?;

        if last_green == project.main_result.commit {
            self.mark_infra(project).await;
            return Ok(());
        }

        self.log(
            Tone::Passed,
            format!("Rebuild at last green commit {last_green}..."),
        )
        .await;
        let pipeline = &self.config.pipeline_slug;
        let request =
            TriggerRequest::new(last_green.as_str(), "Trigger build at last green commit.")
                .with_branch(self.ctx.settings.branch.as_str());
        let build = self.ctx.source.trigger_build(pipeline, &request).await?;
        METRICS.inc_rebuilds();
        let build = self
            .ctx
            .source
            .wait_build(pipeline, build.number, &self.transcript)
            .await?;

        if build.is_failed() {
            self.mark_infra(project).await;
        } else if build.is_passed() {
            self.log(
                Tone::Passed,
                "Project succeeded at last green commit. Maybe main pipeline and downstream pipeline are broken for different reasons.",
            )
            .await;
            self.analyze_main(project).await?;
            self.analyze_downstream(project).await?;
        } else {
            self.log(
                Tone::Serious,
                format!(
                    "Rebuilding project at last green commit failed with unknown reason. Please check {}",
                    build.web_url
                ),
            )
            .await;
            return Err(SheriffError::AmbiguousRebuild {
                project: project.name.clone(),
                commit: last_green,
                state: build.state,
                web_url: build.web_url,
            });
        }
        Ok(())
    }

    /// Retry main-pipeline failures; what still fails is the project's own regression.
    async fn analyze_main(&self, project: &mut Project) -> SheriffResult<()> {
        self.log(Tone::Info, "").await;
        self.log(Tone::Passed, "***Analyze failures in main pipeline***").await;
        self.log(Tone::Warning, "The following tasks are failing in main pipeline")
            .await;
        self.print_tasks(project.main_result.failing_tasks().map(|(_, t)| t))
            .await;

        self.log(Tone::Passed, "Retry failed main pipeline tasks...").await;
        let outcome = retry_failed_tasks(
            self.ctx.source.as_ref(),
            &self.config.pipeline_slug,
            &mut project.main_result,
            &self.transcript,
        )
        .await?;

        if !outcome.flaky.is_empty() {
            self.log(
                Tone::Warning,
                "The following tasks succeeded after retry, they might be flaky",
            )
            .await;
            self.print_retried(&outcome.flaky).await;
        }
        if !outcome.broken.is_empty() {
            let last_green = project
                .main_result
                .last_green_commit
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            self.log(
                Tone::Fail,
                "The following tasks are still failing after retry, they are probably broken due to changes from the project itself.",
            )
            .await;
            self.log(
                Tone::Fail,
                format!("The last recorded green commit is {last_green}. Please file bug for the repository."),
            )
            .await;
            self.print_retried(&outcome.broken).await;
        }
        Ok(())
    }

    /// Retry downstream failures and bisect what still fails.
    async fn analyze_downstream(&self, project: &mut Project) -> SheriffResult<()> {
        self.log(Tone::Info, "").await;
        self.log(Tone::Passed, "***Analyze failures in downstream pipeline***")
            .await;
        self.log(
            Tone::Warning,
            "The following tasks are failing in downstream pipeline",
        )
        .await;
        self.print_tasks(project.downstream_result.failing_tasks().map(|(_, t)| t))
            .await;

        self.log(Tone::Passed, "Retry failed downstream pipeline tasks...")
            .await;
        let outcome = retry_failed_tasks(
            self.ctx.source.as_ref(),
            &self.ctx.settings.downstream_pipeline,
            &mut project.downstream_result,
            &self.transcript,
        )
        .await?;

        if !outcome.flaky.is_empty() {
            self.log(
                Tone::Warning,
                "The following tasks succeeded after retry, they might be flaky",
            )
            .await;
            self.print_retried(&outcome.flaky).await;
        }
        if outcome.broken.is_empty() {
            return Ok(());
        }

        self.log(
            Tone::Fail,
            "The following tasks are still failing after retry, they are probably broken due to recent Bazel changes.",
        )
        .await;
        self.print_retried(&outcome.broken).await;

        self.log(Tone::Passed, "Bisect for still failing tasks...").await;
        let scope = BisectScope {
            project: project.name.clone(),
            tasks: outcome.broken_task_names(),
            good: project
                .main_result
                .last_green_commit
                .clone()
                .ok_or_else(|| SheriffError::MissingLastGreenCommit {
                    project: project.name.clone(),
                })?,
            bad: project
                .downstream_result
                .toolchain_commit
                .clone()
                .ok_or_else(|| {
                    SheriffError::Config(format!(
                        "downstream result of {} has no toolchain commit",
                        project.name
                    ))
                })?,
        };
        METRICS.inc_bisections();
        let outcomes = match self.ctx.bisector.bisect(&scope, &self.transcript).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                self.log(Tone::Serious, e.to_string()).await;
                return Err(e);
            }
        };

        let mut infra = false;
        for task in &scope.tasks {
            let Some(outcome) = outcomes.get(task) else {
                continue;
            };
            infra |= outcome.is_infra_signal();
            let name = match project.downstream_result.tasks.get_mut(task) {
                Some(info) => {
                    if let Some(culprit) = &outcome.culprit {
                        info.culprit = Some(culprit.clone());
                    }
                    info.name.clone()
                }
                None => task.clone(),
            };
            self.log(Tone::Warning, format!("Bisect result for {name}")).await;
            self.log(Tone::Info, outcome.message.clone()).await;
        }
        if infra {
            METRICS.inc_infra_breakages();
            project.mark_broken_by_infra();
            warn!(project = %project.name, "good commit regressed during bisection");
        }
        Ok(())
    }

    async fn mark_infra(&self, project: &mut Project) {
        METRICS.inc_infra_breakages();
        project.mark_broken_by_infra();
        self.log(Tone::Serious, INFRA_BREAKAGE).await;
    }

    async fn log(&self, tone: Tone, text: impl Into<String>) {
        self.transcript.log(tone, text).await;
    }

    async fn print_tasks<'a>(&self, tasks: impl Iterator<Item = &'a TaskResult>) {
        let lines: Vec<String> = tasks
            .map(|t| format!("  {}: {}", t.name, t.web_url))
            .collect();
        for line in lines {
            self.log(Tone::Info, line).await;
        }
        self.log(Tone::Info, "").await;
    }

    async fn print_retried(&self, tasks: &[RetriedTask]) {
        for task in tasks {
            self.log(Tone::Info, format!("  {}: {}", task.name, task.web_url))
                .await;
        }
        self.log(Tone::Info, "").await;
    }
}
