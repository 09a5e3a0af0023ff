//! Per-task results and the flags derived during triage.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::build::CommitId;

/// State of one task as reported by the build record source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskState {
    Passed,
    Failed,
    SoftFailed,
    /// Any other state string (`canceled`, `timed_out`, ...), kept verbatim.
    Other(String),
}

impl TaskState {
    pub fn as_str(&self) -> &str {
        match self {
            TaskState::Passed => "passed",
            TaskState::Failed => "failed",
            TaskState::SoftFailed => "soft_failed",
            TaskState::Other(s) => s,
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, TaskState::Passed)
    }

    /// Whether the task counts as green when deriving a build verdict.
    pub fn is_green(&self) -> bool {
        matches!(self, TaskState::Passed | TaskState::SoftFailed)
    }
}

impl From<&str> for TaskState {
    fn from(s: &str) -> Self {
        match s {
            "passed" => TaskState::Passed,
            "failed" => TaskState::Failed,
            "soft_failed" => TaskState::SoftFailed,
            other => TaskState::Other(other.to_string()),
        }
    }
}

impl From<String> for TaskState {
    fn from(s: String) -> Self {
        TaskState::from(s.as_str())
    }
}

impl From<TaskState> for String {
    fn from(state: TaskState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized result of one task in a build.
///
/// `flaky`, `broken` and `culprit` are never supplied by the source; the
/// analyzer sets them in place as classification proceeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Job id in the build record source.
    pub id: String,

    /// Human-readable job label.
    pub name: String,

    pub state: TaskState,

    pub web_url: String,

    /// Failed on first attempt, passed on retry.
    #[serde(default)]
    pub flaky: bool,

    /// Failed on first attempt and again on retry.
    #[serde(default)]
    pub broken: bool,

    /// First bad toolchain commit found by bisection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culprit: Option<CommitId>,
}

impl TaskResult {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        state: TaskState,
        web_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state,
            web_url: web_url.into(),
            flaky: false,
            broken: false,
            culprit: None,
        }
    }
}
