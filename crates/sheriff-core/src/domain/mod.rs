//! Domain model shared by every triage component.
//!
//! Raw build records are converted into these types at the boundary (see
//! [`crate::extract`]); everything past that point works on typed values.

pub mod build;
pub mod error;
pub mod project;
pub mod task;

pub use build::{BuildResult, BuildState, CommitId};
pub use error::{SheriffError, SheriffResult};
pub use project::{Project, ProjectConfig};
pub use task::{TaskResult, TaskState};
