//! One-shot retry of every non-passing task in a build.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{BuildResult, SheriffError, SheriffResult};
use crate::metrics::METRICS;
use crate::source::{BuildRecordSource, WaitObserver};

/// A task as it looked after its retry finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetriedTask {
    pub task: String,
    pub name: String,
    pub web_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOutcome {
    /// Passed on retry.
    pub flaky: Vec<RetriedTask>,
    /// Still failing after retry.
    pub broken: Vec<RetriedTask>,
}

impl RetryOutcome {
    pub fn broken_task_names(&self) -> Vec<String> {
        self.broken.iter().map(|t| t.task.clone()).collect()
    }
}

/// Retry every task of `result` that did not pass, exactly once.
///
/// All retries are requested before any is waited on. Tasks that pass on
/// retry are marked `flaky`, the others `broken`; a second failure is the
/// verdict.
pub async fn retry_failed_tasks(
    source: &dyn BuildRecordSource,
    pipeline: &str,
    result: &mut BuildResult,
    observer: &dyn WaitObserver,
) -> SheriffResult<RetryOutcome> {
    let build_number = result.build_number;

    let mut pending = Vec::new();
    for (task, info) in result.failing_tasks() {
        let retried = source.retry_job(pipeline, build_number, &info.id).await?;
        METRICS.inc_retries();
        let job_id = retried.id.ok_or_else(|| {
            SheriffError::Source(format!("retry of job {} returned no job id", info.id))
        })?;
        debug!(pipeline, build = build_number, task = %task, job = %job_id, "retry triggered");
        pending.push((task.clone(), job_id));
    }

    let mut outcome = RetryOutcome::default();
    for (task, job_id) in pending {
        let job = source
            .wait_job(pipeline, build_number, &job_id, observer)
            .await?;
        let Some(info) = result.tasks.get_mut(&task) else {
            continue;
        };
        let retried = RetriedTask {
            task: task.clone(),
            name: job.name.clone().unwrap_or_else(|| info.name.clone()),
            web_url: job.web_url.clone().unwrap_or_else(|| info.web_url.clone()),
        };
        if job.is_passed() {
            info.flaky = true;
            outcome.flaky.push(retried);
        } else {
            info.broken = true;
            outcome.broken.push(retried);
        }
    }

    info!(
        pipeline,
        build = build_number,
        flaky = outcome.flaky.len(),
        broken = outcome.broken.len(),
        "retry finished"
    );
    Ok(outcome)
}
