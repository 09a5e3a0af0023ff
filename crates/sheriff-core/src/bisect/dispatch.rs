//! How the analyzer gets a bisection done: on the CI platform or in process.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bisect::engine::{BisectRequest, BisectionEngine};
use crate::culprit::{BisectionOutcome, CulpritClassifier};
use crate::domain::{CommitId, SheriffError, SheriffResult};
use crate::extract::parse_command_flags;
use crate::source::{BuildRecordSource, TriggerRequest, WaitObserver};

/// Command flag naming the task a bisection job works on.
pub const TASK_NAME_FLAG: &str = "task_name";

/// Tasks of one project to bisect over `(good, bad]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BisectScope {
    pub project: String,
    pub tasks: Vec<String>,
    pub good: CommitId,
    pub bad: CommitId,
}

/// Runs bisection for a set of tasks and classifies each result.
#[async_trait]
pub trait Bisector: Send + Sync {
    async fn bisect(
        &self,
        scope: &BisectScope,
        observer: &dyn WaitObserver,
    ) -> SheriffResult<BTreeMap<String, BisectionOutcome>>;
}

/// Triggers one culprit-finder build with a job per task and reads its logs.
pub struct RemoteBisector {
    source: Arc<dyn BuildRecordSource>,
    pipeline: String,
    needs_clean: bool,
    repeat_times: Option<u32>,
}

impl RemoteBisector {
    pub fn new(source: Arc<dyn BuildRecordSource>, pipeline: impl Into<String>) -> Self {
        Self {
            source,
            pipeline: pipeline.into(),
            needs_clean: false,
            repeat_times: None,
        }
    }

    pub fn with_needs_clean(mut self, needs_clean: bool) -> Self {
        self.needs_clean = needs_clean;
        self
    }

    /// Only forwarded when greater than one.
    pub fn with_repeat_times(mut self, repeat_times: u32) -> Self {
        self.repeat_times = (repeat_times > 1).then_some(repeat_times);
        self
    }

    fn request(&self, scope: &BisectScope) -> TriggerRequest {
        let mut request = TriggerRequest::new("HEAD", format!("Bisecting {}", scope.project))
            .with_env("PROJECT_NAME", scope.project.as_str())
            .with_env("TASK_NAME_LIST", scope.tasks.join(","))
            .with_env("GOOD_BAZEL_COMMIT", scope.good.as_str())
            .with_env("BAD_BAZEL_COMMIT", scope.bad.as_str());
        if self.needs_clean {
            request = request.with_env("NEEDS_CLEAN", "1");
        }
        if let Some(times) = self.repeat_times {
            request = request.with_env("REPEAT_TIMES", times.to_string());
        }
        request
    }
}

#[async_trait]
impl Bisector for RemoteBisector {
    async fn bisect(
        &self,
        scope: &BisectScope,
        observer: &dyn WaitObserver,
    ) -> SheriffResult<BTreeMap<String, BisectionOutcome>> {
        let build = self
            .source
            .trigger_build(&self.pipeline, &self.request(scope))
            .await?;
        info!(
            project = %scope.project,
            build = build.number,
            url = %build.web_url,
            "bisect build triggered"
        );
        let build = self
            .source
            .wait_build(&self.pipeline, build.number, observer)
            .await?;

        let mut outcomes = BTreeMap::new();
        for task in &scope.tasks {
            let job = build.jobs.iter().find(|job| {
                job.command
                    .as_deref()
                    .map(|command| {
                        parse_command_flags(command).get(TASK_NAME_FLAG) == Some(task)
                    })
                    .unwrap_or(false)
            });
            let Some(job) = job else {
                return Err(SheriffError::MissingBisectJob {
                    task: task.clone(),
                    web_url: build.web_url.clone(),
                });
            };
            let log = self.source.get_log(&self.pipeline, job).await?;
            let url = job.web_url.as_deref().unwrap_or(&build.web_url);
            outcomes.insert(task.clone(), CulpritClassifier::classify(&log, url));
        }
        Ok(outcomes)
    }
}

/// Runs the [`BisectionEngine`] in process, one task after another.
#[derive(Clone)]
pub struct LocalBisector {
    engine: BisectionEngine,
}

impl LocalBisector {
    pub fn new(engine: BisectionEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Bisector for LocalBisector {
    async fn bisect(
        &self,
        scope: &BisectScope,
        observer: &dyn WaitObserver,
    ) -> SheriffResult<BTreeMap<String, BisectionOutcome>> {
        let mut outcomes = BTreeMap::new();
        for task in &scope.tasks {
            observer
                .waiting(&format!("Waiting for local bisection of {task}"))
                .await;
            let request = BisectRequest {
                project: scope.project.clone(),
                task: task.clone(),
                good: scope.good.clone(),
                bad: scope.bad.clone(),
            };
            let label = format!("local bisection of {}/{task}", scope.project);
            // A regressed baseline or an unreadable range is a verdict for
            // this task, not a reason to abandon the others.
            let log = match self.engine.run(&request).await {
                Ok(report) => report.transcript(),
                Err(
                    e @ (SheriffError::GoodCommitRegressed { .. }
                    | SheriffError::CommitQuery { .. }),
                ) => {
                    warn!(project = %scope.project, task = %task, error = %e, "bisection aborted");
                    e.to_string()
                }
                Err(e) => return Err(e),
            };
            outcomes.insert(task.clone(), CulpritClassifier::classify(&log, &label));
        }
        Ok(outcomes)
    }
}
