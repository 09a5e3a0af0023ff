//! Registered projects and the per-project analysis record.

use serde::{Deserialize, Serialize};

use crate::domain::build::BuildResult;

/// Static description of one downstream project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Display name, e.g. `"rules_go"`.
    pub name: String,

    /// Slug of the project's own (main) pipeline.
    pub pipeline_slug: String,

    /// Upstream git repository of the project.
    pub git_repository: String,

    /// CI configuration URL; ties downstream jobs back to this project.
    pub http_config: String,
}

impl ProjectConfig {
    /// Relative path of the last-green-commit object for this project.
    ///
    /// `https://github.com/bazelbuild/rules_go.git` with pipeline `rules-go`
    /// becomes `github.com/bazelbuild/rules_go.git/rules-go`.
    pub fn last_green_commit_path(&self) -> String {
        let repo = self
            .git_repository
            .strip_prefix("https://")
            .or_else(|| self.git_repository.strip_prefix("http://"))
            .unwrap_or(&self.git_repository);
        format!("{}/{}", repo.trim_end_matches('/'), self.pipeline_slug)
    }
}

/// Analysis state of one project, owned by its analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub pipeline: String,
    pub main_result: BuildResult,
    pub downstream_result: BuildResult,
    pub broken_by_infra: bool,
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        pipeline: impl Into<String>,
        main_result: BuildResult,
        downstream_result: BuildResult,
    ) -> Self {
        Self {
            name: name.into(),
            pipeline: pipeline.into(),
            main_result,
            downstream_result,
            broken_by_infra: false,
        }
    }

    /// Attribute the project's failures to infrastructure.
    ///
    /// Clears any `broken` flag already set; an infra breakage never blames
    /// the project or the toolchain.
    pub fn mark_broken_by_infra(&mut self) {
        self.broken_by_infra = true;
        for task in self
            .main_result
            .tasks
            .values_mut()
            .chain(self.downstream_result.tasks.values_mut())
        {
            task.broken = false;
        }
    }

    pub fn has_broken_tasks(&self) -> bool {
        self.main_result.broken_tasks().next().is_some()
            || self.downstream_result.broken_tasks().next().is_some()
    }
}
