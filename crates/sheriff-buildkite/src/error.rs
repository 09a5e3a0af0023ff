//! Error types for the Buildkite backend

use sheriff_core::SheriffError;
use thiserror::Error;

/// Errors raised while talking to Buildkite
#[derive(Error, Debug)]
pub enum BuildkiteError {
    /// Transport-level failure (DNS, TLS, connection reset, ...)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success HTTP status
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// Response body could not be decoded
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field the caller needs is absent from the response
    #[error("response from {url} has no '{field}'")]
    MissingField { url: String, field: String },

    /// Build or job did not finish within the configured timeout
    #[error("timed out after {seconds}s waiting for {what}")]
    WaitTimeout { what: String, seconds: u64 },

    /// `BUILDKITE_API_TOKEN` or another setting is missing or malformed
    #[error("configuration error: {0}")]
    Config(String),

    /// Running `buildkite-agent` failed
    #[error("buildkite-agent failed: {0}")]
    Agent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildkiteError {
    /// Whether another attempt at the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BuildkiteError::Http(_) => true,
            BuildkiteError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BuildkiteError {
    fn from(err: reqwest::Error) -> Self {
        BuildkiteError::Http(err.to_string())
    }
}

impl From<BuildkiteError> for SheriffError {
    fn from(err: BuildkiteError) -> Self {
        match err {
            BuildkiteError::Config(msg) => SheriffError::Config(msg),
            BuildkiteError::Io(e) => SheriffError::Io(e),
            other => SheriffError::Source(other.to_string()),
        }
    }
}

/// Result type for Buildkite operations
pub type Result<T> = std::result::Result<T, BuildkiteError>;
