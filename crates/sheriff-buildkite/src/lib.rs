//! Buildkite backend for the auto-sheriff
//!
//! - [`BuildkiteClient`]: REST v2 build records, triggers, retries and logs
//! - [`HttpLastGreenCommit`]: last green commit objects over HTTP
//! - [`BuildkiteAnnotator`]: transcripts as `buildkite-agent` annotations

pub mod annotate;
pub mod client;
pub mod error;
pub mod last_green;

pub use annotate::{render_block, BuildkiteAnnotator};
pub use client::{BuildkiteClient, BuildkiteConfig, DEFAULT_API_BASE};
pub use error::{BuildkiteError, Result};
pub use last_green::{HttpLastGreenCommit, DEFAULT_LAST_GREEN_BASE_URL};
