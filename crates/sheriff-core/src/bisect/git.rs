//! Toolchain history read from a local git checkout.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::bisect::engine::CommitHistory;
use crate::domain::{CommitId, SheriffError, SheriffResult};

/// [`CommitHistory`] backed by `git log` in `repo_dir`.
#[derive(Debug, Clone)]
pub struct GitHistory {
    repo_dir: PathBuf,
}

impl GitHistory {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn git(&self, args: &[&str]) -> Result<String, String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .map_err(|e| format!("failed to run git: {e}"))?;
        if !output.status.success() {
            return Err(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl CommitHistory for GitHistory {
    async fn commits_between(
        &self,
        good: &CommitId,
        bad: &CommitId,
    ) -> SheriffResult<Vec<CommitId>> {
        let range = format!("{good}..{bad}");
        let stdout = self
            .git(&["log", "--pretty=tformat:%H", &range])
            .await
            .map_err(|detail| SheriffError::CommitQuery {
                good: good.clone(),
                bad: bad.clone(),
                detail,
            })?;
        // git log lists newest first.
        Ok(stdout
            .lines()
            .rev()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(CommitId::from)
            .collect())
    }

    async fn describe(&self, commit: &CommitId) -> SheriffResult<String> {
        self.git(&["--no-pager", "log", "-n", "1", commit.as_str()])
            .await
            .map_err(SheriffError::Source)
    }
}
