//! Last-green-commit lookup over plain HTTP.
//!
//! The commit is stored as a text object at
//! `<base_url>/<repository path>/<pipeline>`; a missing object or an empty
//! body means the project has never been green. Transport errors, 429 and
//! 5xx responses are retried like Buildkite API calls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use sheriff_core::source::LastGreenCommitSource;
use sheriff_core::{CommitId, ProjectConfig, SheriffResult};

use crate::error::{BuildkiteError, Result};

pub const DEFAULT_LAST_GREEN_BASE_URL: &str =
    "https://storage.googleapis.com/bazel-untrusted-builds/last_green_commit";

pub struct HttpLastGreenCommit {
    http: reqwest::Client,
    base_url: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl HttpLastGreenCommit {
    pub fn new(base_url: &str) -> Self {
        HttpLastGreenCommit {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_attempts: 5,
            retry_delay: Duration::from_secs(10),
        }
    }

    pub fn with_retries(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Object URL holding the last green commit of `project`.
    pub fn url_for(&self, project: &ProjectConfig) -> String {
        format!("{}/{}", self.base_url, project.last_green_commit_path())
    }

    async fn fetch(&self, url: &str) -> Result<Option<CommitId>> {
        let mut attempt = 1;
        loop {
            let err = match self.fetch_once(url).await {
                Ok(commit) => return Ok(commit),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }
            warn!(
                url,
                attempt,
                max_attempts = self.max_attempts,
                error = %err,
                "last green commit lookup failed, retrying"
            );
            attempt += 1;
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Option<CommitId>> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(url, "no last green commit recorded");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(BuildkiteError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(parse_commit(&response.text().await?))
    }
}

impl Default for HttpLastGreenCommit {
    fn default() -> Self {
        Self::new(DEFAULT_LAST_GREEN_BASE_URL)
    }
}

fn parse_commit(body: &str) -> Option<CommitId> {
    let commit = body.trim();
    (!commit.is_empty()).then(|| CommitId::new(commit))
}

#[async_trait]
impl LastGreenCommitSource for HttpLastGreenCommit {
    async fn last_green_commit(&self, project: &ProjectConfig) -> SheriffResult<Option<CommitId>> {
        let url = self.url_for(project);
        Ok(self.fetch(&url).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules_go() -> ProjectConfig {
        ProjectConfig {
            name: "rules_go".to_string(),
            pipeline_slug: "rules-go-golang".to_string(),
            git_repository: "https://github.com/bazelbuild/rules_go.git".to_string(),
            http_config: "https://example.com/rules_go/presubmit.yml".to_string(),
        }
    }

    #[test]
    fn test_url_strips_scheme_and_trailing_slash() {
        let source = HttpLastGreenCommit::new("https://example.com/last_green_commit/");
        assert_eq!(
            source.url_for(&rules_go()),
            "https://example.com/last_green_commit/github.com/bazelbuild/rules_go.git/rules-go-golang"
        );
    }

    #[test]
    fn test_retries_floor_at_one_attempt() {
        let source = HttpLastGreenCommit::default().with_retries(0, Duration::ZERO);
        assert_eq!(source.max_attempts, 1);
        assert_eq!(source.retry_delay, Duration::ZERO);
    }

    #[test]
    fn test_parse_commit() {
        assert_eq!(parse_commit("  abc123\n"), Some(CommitId::new("abc123")));
        assert_eq!(parse_commit("\n"), None);
        assert_eq!(parse_commit(""), None);
    }
}
