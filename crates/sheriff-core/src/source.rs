//! Boundary to the CI platform that stores builds and jobs.
//!
//! Records arrive loosely typed; every field the analyzer reads is optional
//! here so that one malformed job never poisons the whole build. The
//! [`crate::extract`] functions turn them into [`crate::domain::BuildResult`]s.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{CommitId, ProjectConfig, SheriffResult};

/// One job as reported by the build record source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub raw_log_url: Option<String>,
}

impl JobRecord {
    pub fn is_passed(&self) -> bool {
        self.state.as_deref() == Some("passed")
    }
}

/// One build as reported by the build record source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub number: u64,
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub jobs: Vec<JobRecord>,
}

impl BuildRecord {
    pub fn is_passed(&self) -> bool {
        self.state == "passed"
    }

    pub fn is_failed(&self) -> bool {
        self.state == "failed"
    }

    pub fn commit_id(&self) -> CommitId {
        CommitId::new(self.commit.clone())
    }
}

/// Query filters for [`BuildRecordSource::list_builds`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFilter {
    pub branch: String,
    pub page: u32,
    pub per_page: u32,
    pub states: Vec<String>,
}

impl BuildFilter {
    /// Most recent build on `branch` that finished as passed or failed.
    pub fn latest_finished(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            page: 1,
            per_page: 1,
            states: vec!["failed".to_string(), "passed".to_string()],
        }
    }

    /// Query-string pairs in the order the REST API expects them.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("branch".to_string(), self.branch.clone()),
            ("page".to_string(), self.page.to_string()),
            ("per_page".to_string(), self.per_page.to_string()),
        ];
        pairs.extend(self.states.iter().map(|s| ("state[]".to_string(), s.clone())));
        pairs
    }
}

/// A request to start a new build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub commit: String,
    pub message: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl TriggerRequest {
    pub fn new(commit: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            commit: commit.into(),
            message: message.into(),
            env: BTreeMap::new(),
            branch: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// Receives progress lines while a build or job is being waited on.
#[async_trait]
pub trait WaitObserver: Send + Sync {
    async fn waiting(&self, message: &str);
}

/// Observer that only mirrors progress to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

#[async_trait]
impl WaitObserver for TracingObserver {
    async fn waiting(&self, message: &str) {
        tracing::debug!(%message, "waiting");
    }
}

/// Injectable access to builds, jobs and logs of the CI platform.
///
/// Every call blocks the calling worker until the remote operation completes
/// or the implementation's own polling timeout elapses.
#[async_trait]
pub trait BuildRecordSource: Send + Sync {
    async fn list_builds(&self, pipeline: &str, filter: &BuildFilter)
        -> SheriffResult<Vec<BuildRecord>>;

    async fn get_build(&self, pipeline: &str, number: u64) -> SheriffResult<BuildRecord>;

    async fn trigger_build(
        &self,
        pipeline: &str,
        request: &TriggerRequest,
    ) -> SheriffResult<BuildRecord>;

    /// Block until the build reaches a terminal state.
    async fn wait_build(
        &self,
        pipeline: &str,
        number: u64,
        observer: &dyn WaitObserver,
    ) -> SheriffResult<BuildRecord>;

    async fn retry_job(&self, pipeline: &str, number: u64, job_id: &str)
        -> SheriffResult<JobRecord>;

    /// Block until the job reaches a terminal state.
    async fn wait_job(
        &self,
        pipeline: &str,
        number: u64,
        job_id: &str,
        observer: &dyn WaitObserver,
    ) -> SheriffResult<JobRecord>;

    async fn get_log(&self, pipeline: &str, job: &JobRecord) -> SheriffResult<String>;
}

/// Lookup of the most recent commit at which a project's main build passed.
#[async_trait]
pub trait LastGreenCommitSource: Send + Sync {
    async fn last_green_commit(&self, project: &ProjectConfig)
        -> SheriffResult<Option<CommitId>>;
}
