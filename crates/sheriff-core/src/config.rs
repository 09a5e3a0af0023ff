//! Sheriff configuration loaded from TOML.
//!
//! Every section has defaults, so an empty file (or none) yields the
//! production pipeline names with no registered projects.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{ProjectConfig, SheriffError, SheriffResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheriffConfig {
    pub buildkite: PipelineSettings,
    pub last_green: LastGreenSettings,
    pub bisect: BisectSettings,
    pub projects: Vec<ProjectConfig>,
}

/// Pipelines the sheriff reads from and triggers on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub org: String,
    /// The toolchain-at-head fan-out pipeline.
    pub downstream_pipeline: String,
    pub culprit_finder_pipeline: String,
    /// Runs a single task against the toolchain at a given commit.
    pub probe_pipeline: String,
    /// Mainline branch whose builds are triaged.
    pub branch: String,
    /// Substring identifying jobs that run a project task.
    pub runner_marker: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            org: "bazel".to_string(),
            downstream_pipeline: "bazel-at-head-plus-downstream".to_string(),
            culprit_finder_pipeline: "culprit-finder".to_string(),
            probe_pipeline: "culprit-finder-probe".to_string(),
            branch: "master".to_string(),
            runner_marker: "bazelci.py runner".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LastGreenSettings {
    pub base_url: String,
}

impl Default for LastGreenSettings {
    fn default() -> Self {
        Self {
            base_url: "https://storage.googleapis.com/bazel-untrusted-builds/last_green_commit"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BisectSettings {
    /// Run every probe in a clean workspace.
    pub needs_clean: bool,
    /// Attempts per probe; a commit is good only if all pass.
    pub repeat_times: u32,
}

impl Default for BisectSettings {
    fn default() -> Self {
        Self {
            needs_clean: false,
            repeat_times: 1,
        }
    }
}

impl SheriffConfig {
    pub fn from_toml_str(text: &str) -> SheriffResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SheriffError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> SheriffResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SheriffError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject duplicate names or CI configurations and empty slugs.
    pub fn validate(&self) -> SheriffResult<()> {
        if self.bisect.repeat_times == 0 {
            return Err(SheriffError::Config(
                "bisect.repeat_times must be at least 1".to_string(),
            ));
        }
        let mut names = BTreeSet::new();
        let mut configs = BTreeSet::new();
        for project in &self.projects {
            if project.pipeline_slug.is_empty() {
                return Err(SheriffError::Config(format!(
                    "project '{}' has no pipeline_slug",
                    project.name
                )));
            }
            if !names.insert(project.name.as_str()) {
                return Err(SheriffError::Config(format!(
                    "project '{}' is registered twice",
                    project.name
                )));
            }
            if !configs.insert(project.http_config.as_str()) {
                return Err(SheriffError::Config(format!(
                    "http_config '{}' is shared by more than one project",
                    project.http_config
                )));
            }
        }
        Ok(())
    }

    pub fn project(&self, name: &str) -> SheriffResult<&ProjectConfig> {
        self.projects
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| SheriffError::UnknownProject {
                name: name.to_string(),
                available: self.project_names(),
            })
    }

    pub fn project_names(&self) -> Vec<String> {
        self.projects.iter().map(|p| p.name.clone()).collect()
    }
}
