//! Probes that run a task against the toolchain built at a given commit.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::bisect::engine::Probe;
use crate::domain::{CommitId, SheriffResult};
use crate::source::{BuildRecordSource, TracingObserver, TriggerRequest, WaitObserver};

/// Triggers one probe build per attempt on a dedicated pipeline.
///
/// With `repeat_times > 1` a commit only counts as good when every attempt
/// passes; the first failing attempt ends the probe.
pub struct PipelineProbe {
    source: Arc<dyn BuildRecordSource>,
    pipeline: String,
    needs_clean: bool,
    repeat_times: u32,
    observer: Arc<dyn WaitObserver>,
}

impl PipelineProbe {
    pub fn new(source: Arc<dyn BuildRecordSource>, pipeline: impl Into<String>) -> Self {
        Self {
            source,
            pipeline: pipeline.into(),
            needs_clean: false,
            repeat_times: 1,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_needs_clean(mut self, needs_clean: bool) -> Self {
        self.needs_clean = needs_clean;
        self
    }

    pub fn with_repeat_times(mut self, repeat_times: u32) -> Self {
        self.repeat_times = repeat_times.max(1);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn WaitObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn request(
        &self,
        project: &str,
        task: &str,
        commit: &CommitId,
        attempt: u32,
    ) -> TriggerRequest {
        let mut request = TriggerRequest::new(
            "HEAD",
            format!("Probe {project}/{task} with Bazel at {} (try {attempt})", commit.short()),
        )
        .with_env("PROJECT_NAME", project)
        .with_env("TASK_NAME", task)
        .with_env("USE_BAZEL_AT_COMMIT", commit.as_str());
        if self.needs_clean {
            request = request.with_env("NEEDS_CLEAN", "1");
        }
        request
    }
}

#[async_trait]
impl Probe for PipelineProbe {
    async fn probe(&self, project: &str, task: &str, commit: &CommitId) -> SheriffResult<bool> {
        for attempt in 1..=self.repeat_times {
            let request = self.request(project, task, commit, attempt);
            let build = self.source.trigger_build(&self.pipeline, &request).await?;
            let build = self
                .source
                .wait_build(&self.pipeline, build.number, self.observer.as_ref())
                .await?;
            info!(
                project,
                task,
                commit = %commit.short(),
                attempt,
                state = %build.state,
                url = %build.web_url,
                "probe build finished"
            );
            if !build.is_passed() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
