//! Error taxonomy for triage and bisection.

use crate::domain::build::CommitId;

/// Errors produced while triaging a project or bisecting a regression.
///
/// Every variant is raised inside a single analyzer worker and stops that
/// worker only; sibling projects keep going.
#[derive(Debug, thiserror::Error)]
pub enum SheriffError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("project '{name}' not recognized, available projects are {available:?}")]
    UnknownProject {
        name: String,
        available: Vec<String>,
    },

    #[error("cannot find finished build for pipeline {pipeline}, please try to rerun the pipeline first")]
    NoFinishedBuild { pipeline: String },

    #[error("failed to get commits between {good}..{bad}: {detail}")]
    CommitQuery {
        good: CommitId,
        bad: CommitId,
        detail: String,
    },

    /// Matches the marker the culprit classifier looks for in probe logs.
    #[error("Given good commit ({commit}) is not actually good, abort bisecting.")]
    GoodCommitRegressed { commit: CommitId },

    #[error("rebuilding {project} at last green commit {commit} finished in state '{state}', please check {web_url}")]
    AmbiguousRebuild {
        project: String,
        commit: CommitId,
        state: String,
        web_url: String,
    },

    #[error("bisect job for task {task} is missing in {web_url}")]
    MissingBisectJob { task: String, web_url: String },

    #[error("no last green commit recorded for {project}")]
    MissingLastGreenCommit { project: String },

    #[error("build record source error: {0}")]
    Source(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SheriffError {
    /// Whether this error points at the CI environment rather than a code change.
    pub fn is_infra_signal(&self) -> bool {
        matches!(self, SheriffError::GoodCommitRegressed { .. })
    }
}

/// Result type for triage operations.
pub type SheriffResult<T> = std::result::Result<T, SheriffError>;
