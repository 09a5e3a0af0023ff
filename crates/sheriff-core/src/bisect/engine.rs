//! Binary search for the first toolchain commit that breaks a task.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::culprit::{CULPRIT_MARKER, NOT_REPRODUCED_MARKER};
use crate::domain::{CommitId, SheriffError, SheriffResult};
use crate::metrics::METRICS;

/// Ordered toolchain history.
#[async_trait]
pub trait CommitHistory: Send + Sync {
    /// Commits after `good` up to and including `bad`, oldest first.
    async fn commits_between(&self, good: &CommitId, bad: &CommitId)
        -> SheriffResult<Vec<CommitId>>;

    /// Human-readable change description of `commit`.
    async fn describe(&self, commit: &CommitId) -> SheriffResult<String>;
}

/// One build-and-test round trip of a task against the toolchain at a commit.
#[async_trait]
pub trait Probe: Send + Sync {
    /// `true` when the task succeeded.
    async fn probe(&self, project: &str, task: &str, commit: &CommitId) -> SheriffResult<bool>;
}

/// What to bisect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BisectRequest {
    pub project: String,
    pub task: String,
    pub good: CommitId,
    pub bad: CommitId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FirstBadCommit {
    Found { commit: CommitId, description: String },
    /// Every commit in the range probed as good.
    NotFound,
}

/// A single probe and its verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub commit: CommitId,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BisectionReport {
    pub request: BisectRequest,
    pub range_len: usize,
    /// Midpoint probes in the order they ran; the good-endpoint check is not included.
    pub probes: Vec<ProbeRecord>,
    pub result: FirstBadCommit,
}

impl BisectionReport {
    pub fn culprit(&self) -> Option<&CommitId> {
        match &self.result {
            FirstBadCommit::Found { commit, .. } => Some(commit),
            FirstBadCommit::NotFound => None,
        }
    }

    /// Log text a bisection job prints; it is what the culprit classifier reads.
    pub fn transcript(&self) -> String {
        let mut lines = vec![format!(
            "Bisecting {} for {} between {} and {} ({} commits)",
            self.request.task,
            self.request.project,
            self.request.good,
            self.request.bad,
            self.range_len
        )];
        for probe in &self.probes {
            let verdict = if probe.passed { "Succeeded" } else { "Failed" };
            lines.push(format!("{verdict} at {}", probe.commit));
        }
        match &self.result {
            FirstBadCommit::Found {
                commit,
                description,
            } => {
                lines.push(format!("{CULPRIT_MARKER}{commit}"));
                if !description.is_empty() {
                    lines.push(description.trim_end().to_string());
                }
            }
            FirstBadCommit::NotFound => lines.push(NOT_REPRODUCED_MARKER.to_string()),
        }
        lines.join("\n")
    }
}

/// Bisects one task at a time; probes run sequentially.
#[derive(Clone)]
pub struct BisectionEngine {
    history: Arc<dyn CommitHistory>,
    probe: Arc<dyn Probe>,
}

impl BisectionEngine {
    pub fn new(history: Arc<dyn CommitHistory>, probe: Arc<dyn Probe>) -> Self {
        Self { history, probe }
    }

    /// Verify the good endpoint, then binary-search `(good, bad]`.
    ///
    /// Fails with [`SheriffError::GoodCommitRegressed`] before any midpoint
    /// probe if the good endpoint does not pass, and with
    /// [`SheriffError::CommitQuery`] if the range cannot be computed.
    pub async fn run(&self, request: &BisectRequest) -> SheriffResult<BisectionReport> {
        info!(
            project = %request.project,
            task = %request.task,
            good = %request.good,
            bad = %request.bad,
            "checking good commit"
        );
        if !self.probe_at(request, &request.good).await? {
            return Err(SheriffError::GoodCommitRegressed {
                commit: request.good.clone(),
            });
        }

        let commits = self
            .history
            .commits_between(&request.good, &request.bad)
            .await?;

        let mut probes = Vec::new();
        let mut left = 0;
        let mut right = commits.len();
        // [0, left) known good, [right, len) known bad.
        while left < right {
            let mid = left + (right - left - 1) / 2;
            let commit = &commits[mid];
            debug!(remaining = right - left, commit = %commit, "probing midpoint");
            let passed = self.probe_at(request, commit).await?;
            probes.push(ProbeRecord {
                commit: commit.clone(),
                passed,
            });
            if passed {
                left = mid + 1;
            } else {
                right = mid;
            }
        }

        let result = match commits.get(right) {
            None => {
                info!(task = %request.task, "first bad commit not found");
                FirstBadCommit::NotFound
            }
            Some(commit) => {
                info!(task = %request.task, culprit = %commit, "first bad commit found");
                let description = match self.history.describe(commit).await {
                    Ok(description) => description,
                    Err(e) => {
                        warn!(culprit = %commit, error = %e, "cannot describe culprit");
                        String::new()
                    }
                };
                FirstBadCommit::Found {
                    commit: commit.clone(),
                    description,
                }
            }
        };

        Ok(BisectionReport {
            request: request.clone(),
            range_len: commits.len(),
            probes,
            result,
        })
    }

    async fn probe_at(&self, request: &BisectRequest, commit: &CommitId) -> SheriffResult<bool> {
        METRICS.inc_probes();
        let passed = self
            .probe
            .probe(&request.project, &request.task, commit)
            .await?;
        info!(task = %request.task, commit = %commit.short(), passed, "probe finished");
        Ok(passed)
    }
}
