//! Build-level results and commit identifiers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::task::TaskResult;

/// A revision identifier (full commit hashes are 40 hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    /// Length of a full commit hash.
    pub const FULL_LEN: usize = 40;

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a full 40-character hexadecimal hash.
    pub fn is_full_sha(&self) -> bool {
        self.0.len() == Self::FULL_LEN && self.0.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// First 12 characters, for log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CommitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Pass/fail verdict of a whole build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Passed,
    Failed,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildState::Passed => f.write_str("PASSED"),
            BuildState::Failed => f.write_str("FAILED"),
        }
    }
}

/// Normalized result of one build on either track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Project commit the build ran at.
    pub commit: CommitId,

    /// Toolchain revision under test (downstream track only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchain_commit: Option<CommitId>,

    pub build_number: u64,

    /// Results keyed by logical task name.
    pub tasks: BTreeMap<String, TaskResult>,

    /// Most recent commit at which the main build passed (main track only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_green_commit: Option<CommitId>,
}

impl BuildResult {
    pub fn new(commit: CommitId, build_number: u64, tasks: BTreeMap<String, TaskResult>) -> Self {
        Self {
            commit,
            toolchain_commit: None,
            build_number,
            tasks,
            last_green_commit: None,
        }
    }

    pub fn with_toolchain_commit(mut self, commit: CommitId) -> Self {
        self.toolchain_commit = Some(commit);
        self
    }

    pub fn with_last_green_commit(mut self, commit: Option<CommitId>) -> Self {
        self.last_green_commit = commit;
        self
    }

    /// Failed iff any task is neither `passed` nor `soft_failed`.
    pub fn state(&self) -> BuildState {
        if self.tasks.values().all(|t| t.state.is_green()) {
            BuildState::Passed
        } else {
            BuildState::Failed
        }
    }

    /// Tasks that did not pass on their first attempt.
    pub fn failing_tasks(&self) -> impl Iterator<Item = (&String, &TaskResult)> {
        self.tasks.iter().filter(|(_, t)| !t.state.is_passed())
    }

    pub fn flaky_tasks(&self) -> impl Iterator<Item = (&String, &TaskResult)> {
        self.tasks.iter().filter(|(_, t)| t.flaky)
    }

    pub fn broken_tasks(&self) -> impl Iterator<Item = (&String, &TaskResult)> {
        self.tasks.iter().filter(|(_, t)| t.broken)
    }

    /// Distinct culprits attached to any task.
    pub fn culprits(&self) -> BTreeSet<CommitId> {
        self.tasks
            .values()
            .filter_map(|t| t.culprit.clone())
            .collect()
    }
}
