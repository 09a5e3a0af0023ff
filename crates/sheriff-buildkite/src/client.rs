//! Buildkite REST v2 client implementing [`BuildRecordSource`].
//!
//! Every request is attempted up to `max_attempts` times with a fixed delay
//! between attempts; only then does the failure surface to the analyzer.
//! Waiting for builds and jobs is plain polling and reports progress to the
//! caller's [`WaitObserver`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use sheriff_core::source::{
    BuildFilter, BuildRecord, BuildRecordSource, JobRecord, TriggerRequest, WaitObserver,
};
use sheriff_core::SheriffResult;

use crate::error::{BuildkiteError, Result};

pub const DEFAULT_API_BASE: &str = "https://api.buildkite.com/v2";

/// Build states after which a build never changes again.
const TERMINAL_BUILD_STATES: &[&str] = &["passed", "failed", "canceled", "skipped", "not_run"];

/// Job states after which a job never changes again.
const TERMINAL_JOB_STATES: &[&str] = &[
    "passed",
    "failed",
    "soft_failed",
    "canceled",
    "timed_out",
    "skipped",
    "broken",
    "expired",
];

/// Buildkite client configuration
#[derive(Debug, Clone)]
pub struct BuildkiteConfig {
    pub api_base: String,
    pub org: String,
    /// API access token (sent as a bearer token)
    pub token: Option<String>,
    /// Branch used when a trigger request does not name one
    pub branch: String,
    pub poll_interval: Duration,
    /// Attempts per request, including the first
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Give up waiting for a build or job after this long
    pub wait_timeout: Option<Duration>,
}

impl BuildkiteConfig {
    pub fn new(org: &str) -> Self {
        BuildkiteConfig {
            api_base: DEFAULT_API_BASE.to_string(),
            org: org.to_string(),
            token: None,
            branch: "master".to_string(),
            poll_interval: Duration::from_secs(30),
            max_attempts: 5,
            retry_delay: Duration::from_secs(10),
            wait_timeout: None,
        }
    }

    /// Create config from environment variables
    ///
    /// Reads `BUILDKITE_API_TOKEN`, `BUILDKITE_API_BASE`, `BUILDKITE_BRANCH`,
    /// `BUILDKITE_POLL_SECS`, `BUILDKITE_MAX_ATTEMPTS`,
    /// `BUILDKITE_RETRY_DELAY_SECS` and `BUILDKITE_WAIT_TIMEOUT_SECS`.
    pub fn from_env(org: &str) -> Result<Self> {
        Self::from_lookup(org, |key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(org: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let number = |key: &str| -> Result<Option<u64>> {
            match lookup(key).filter(|v| !v.trim().is_empty()) {
                None => Ok(None),
                Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                    BuildkiteError::Config(format!(
                        "{key} must be a non-negative integer, got '{raw}'"
                    ))
                }),
            }
        };

        let mut config = Self::new(org);
        config.token = lookup("BUILDKITE_API_TOKEN").filter(|t| !t.is_empty());
        if let Some(base) = lookup("BUILDKITE_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(branch) = lookup("BUILDKITE_BRANCH").filter(|b| !b.is_empty()) {
            config.branch = branch;
        }
        if let Some(secs) = number("BUILDKITE_POLL_SECS")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = number("BUILDKITE_MAX_ATTEMPTS")? {
            config.max_attempts = attempts.clamp(1, u64::from(u32::MAX)) as u32;
        }
        if let Some(secs) = number("BUILDKITE_RETRY_DELAY_SECS")? {
            config.retry_delay = Duration::from_secs(secs);
        }
        config.wait_timeout = number("BUILDKITE_WAIT_TIMEOUT_SECS")?.map(Duration::from_secs);
        Ok(config)
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_polling(mut self, poll_interval: Duration, wait_timeout: Option<Duration>) -> Self {
        self.poll_interval = poll_interval;
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn with_retries(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }
}

/// Buildkite REST client for one organization
pub struct BuildkiteClient {
    config: BuildkiteConfig,
    http: reqwest::Client,
}

impl BuildkiteClient {
    pub fn new(config: BuildkiteConfig) -> Self {
        BuildkiteClient {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env(org: &str) -> Result<Self> {
        Ok(Self::new(BuildkiteConfig::from_env(org)?))
    }

    pub fn config(&self) -> &BuildkiteConfig {
        &self.config
    }

    fn builds_url(&self, pipeline: &str) -> String {
        format!(
            "{}/organizations/{}/pipelines/{}/builds",
            self.config.api_base, self.config.org, pipeline
        )
    }

    /// Send one request, retrying transport errors, 429 and 5xx responses.
    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let mut attempt = 1;
        loop {
            let mut request = self.http.request(method.clone(), url).query(query);
            if let Some(token) = &self.config.token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let err = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    BuildkiteError::Status {
                        status,
                        url: url.to_string(),
                        body: response.text().await.unwrap_or_default(),
                    }
                }
                Err(e) => BuildkiteError::from(e),
            };

            if !err.is_retryable() || attempt >= self.config.max_attempts {
                return Err(err);
            }
            warn!(
                %method,
                url,
                attempt,
                max_attempts = self.config.max_attempts,
                error = %err,
                "buildkite request failed, retrying"
            );
            attempt += 1;
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        query: &[(String, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<T> {
        let response = self.send(method, url, query, body).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn fetch_build(&self, pipeline: &str, number: u64) -> Result<BuildRecord> {
        let url = format!("{}/{number}", self.builds_url(pipeline));
        self.send_json(Method::GET, &url, &[], None).await
    }

    fn check_timeout(&self, started: Instant, what: &str) -> Result<()> {
        match self.config.wait_timeout {
            Some(limit) if started.elapsed() >= limit => Err(BuildkiteError::WaitTimeout {
                what: what.to_string(),
                seconds: limit.as_secs(),
            }),
            _ => Ok(()),
        }
    }

    async fn wait_for_build(
        &self,
        pipeline: &str,
        number: u64,
        observer: &dyn WaitObserver,
    ) -> Result<BuildRecord> {
        let started = Instant::now();
        loop {
            let build = self.fetch_build(pipeline, number).await?;
            if TERMINAL_BUILD_STATES.contains(&build.state.as_str()) {
                info!(pipeline, build = number, state = %build.state, "build finished");
                return Ok(build);
            }
            let what = format!("{pipeline} build #{number}");
            self.check_timeout(started, &what)?;
            observer
                .waiting(&format!(
                    "Waiting for {what} to finish (state: {}), {}",
                    build.state, build.web_url
                ))
                .await;
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn wait_for_job(
        &self,
        pipeline: &str,
        number: u64,
        job_id: &str,
        observer: &dyn WaitObserver,
    ) -> Result<JobRecord> {
        let started = Instant::now();
        loop {
            let build = self.fetch_build(pipeline, number).await?;
            let job = build
                .jobs
                .into_iter()
                .find(|j| j.id.as_deref() == Some(job_id))
                .ok_or_else(|| BuildkiteError::MissingField {
                    url: build.web_url.clone(),
                    field: format!("job {job_id}"),
                })?;
            let state = job.state.clone().unwrap_or_default();
            if TERMINAL_JOB_STATES.contains(&state.as_str()) {
                debug!(pipeline, build = number, job = job_id, %state, "job finished");
                return Ok(job);
            }
            let name = job.name.clone().unwrap_or_else(|| job_id.to_string());
            let what = format!("job '{name}' of {pipeline} build #{number}");
            self.check_timeout(started, &what)?;
            observer
                .waiting(&format!(
                    "Waiting for {what} to finish (state: {state}), {}",
                    job.web_url.as_deref().unwrap_or_default()
                ))
                .await;
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl BuildRecordSource for BuildkiteClient {
    async fn list_builds(
        &self,
        pipeline: &str,
        filter: &BuildFilter,
    ) -> SheriffResult<Vec<BuildRecord>> {
        let url = self.builds_url(pipeline);
        Ok(self
            .send_json(Method::GET, &url, &filter.query_pairs(), None)
            .await?)
    }

    async fn get_build(&self, pipeline: &str, number: u64) -> SheriffResult<BuildRecord> {
        Ok(self.fetch_build(pipeline, number).await?)
    }

    async fn trigger_build(
        &self,
        pipeline: &str,
        request: &TriggerRequest,
    ) -> SheriffResult<BuildRecord> {
        let body = json!({
            "commit": request.commit,
            "branch": request.branch.as_deref().unwrap_or(&self.config.branch),
            "message": request.message,
            "env": request.env,
        });
        let build: BuildRecord = self
            .send_json(Method::POST, &self.builds_url(pipeline), &[], Some(&body))
            .await?;
        info!(pipeline, build = build.number, url = %build.web_url, "build triggered");
        Ok(build)
    }

    async fn wait_build(
        &self,
        pipeline: &str,
        number: u64,
        observer: &dyn WaitObserver,
    ) -> SheriffResult<BuildRecord> {
        Ok(self.wait_for_build(pipeline, number, observer).await?)
    }

    async fn retry_job(
        &self,
        pipeline: &str,
        number: u64,
        job_id: &str,
    ) -> SheriffResult<JobRecord> {
        let url = format!("{}/{number}/jobs/{job_id}/retry", self.builds_url(pipeline));
        let job: JobRecord = self.send_json(Method::PUT, &url, &[], None).await?;
        debug!(pipeline, build = number, job = job_id, retried = ?job.id, "job retried");
        Ok(job)
    }

    async fn wait_job(
        &self,
        pipeline: &str,
        number: u64,
        job_id: &str,
        observer: &dyn WaitObserver,
    ) -> SheriffResult<JobRecord> {
        Ok(self.wait_for_job(pipeline, number, job_id, observer).await?)
    }

    async fn get_log(&self, _pipeline: &str, job: &JobRecord) -> SheriffResult<String> {
        let url = job
            .raw_log_url
            .as_deref()
            .ok_or_else(|| BuildkiteError::MissingField {
                url: job.web_url.clone().unwrap_or_default(),
                field: "raw_log_url".to_string(),
            })?;
        let response = self.send(Method::GET, url, &[], None).await?;
        Ok(response.text().await.map_err(BuildkiteError::from)?)
    }
}
