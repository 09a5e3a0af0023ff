//! Per-project progress transcripts and the shared success log.
//!
//! Each analyzer appends tone-tagged lines to its own [`Transcript`]; after
//! every append the whole transcript is republished through a
//! [`ProgressSink`] so partial progress is visible while the worker runs.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::SheriffResult;
use crate::source::WaitObserver;

pub const ANSI_RESET: &str = "\x1b[0m";

/// Annotation context shared by every successful project.
pub const SUCCESS_CONTEXT: &str = "success-info";

const WAITING_PREFIX: &str = "Waiting for ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Serious,
    Header,
    Passed,
    Warning,
    Fail,
    Info,
}

impl Tone {
    pub fn ansi(self) -> &'static str {
        match self {
            Tone::Serious => "\x1b[95m",
            Tone::Header => "\x1b[34m",
            Tone::Passed => "\x1b[92m",
            Tone::Warning => "\x1b[93m",
            Tone::Fail => "\x1b[91m",
            Tone::Info => ANSI_RESET,
        }
    }

    pub fn paint(self, text: &str) -> String {
        format!("{}{text}{ANSI_RESET}", self.ansi())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationStyle {
    Success,
    Info,
    Warning,
    Error,
}

impl AnnotationStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            AnnotationStyle::Success => "success",
            AnnotationStyle::Info => "info",
            AnnotationStyle::Warning => "warning",
            AnnotationStyle::Error => "error",
        }
    }
}

/// A full snapshot of one transcript, ready to be rendered by a sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationBlock {
    /// Replaces any earlier block with the same context unless `append` is set.
    pub context: String,
    pub style: AnnotationStyle,
    pub title: String,
    /// Terminal lines, ANSI colours included.
    pub lines: Vec<String>,
    pub append: bool,
}

/// Where transcript snapshots are published.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, block: &AnnotationBlock) -> SheriffResult<()>;
}

/// Sink that only traces block updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl ProgressSink for TracingSink {
    async fn publish(&self, block: &AnnotationBlock) -> SheriffResult<()> {
        debug!(context = %block.context, lines = block.lines.len(), "annotation updated");
        Ok(())
    }
}

/// Append-only log of one project's analysis.
pub struct Transcript {
    project: String,
    context: String,
    entries: Mutex<Vec<(Tone, String)>>,
    sink: Arc<dyn ProgressSink>,
}

impl Transcript {
    pub fn new(
        project: impl Into<String>,
        context: impl Into<String>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let project = project.into();
        let header = format!("Analyzing {project}: ");
        Self {
            project,
            context: context.into(),
            entries: Mutex::new(vec![(Tone::Header, header)]),
            sink,
        }
    }

    /// Append a line and republish the transcript.
    pub async fn log(&self, tone: Tone, text: impl Into<String>) {
        let text = text.into();
        match tone {
            Tone::Serious | Tone::Fail => warn!(project = %self.project, "{text}"),
            _ => info!(project = %self.project, "{text}"),
        }
        let block = {
            let mut entries = self.lock();
            entries.push((tone, text));
            self.block_from(&entries)
        };
        self.publish(block).await;
    }

    /// Plain lines without colour codes.
    pub fn lines(&self) -> Vec<String> {
        self.lock().iter().map(|(_, text)| text.clone()).collect()
    }

    pub fn snapshot(&self) -> AnnotationBlock {
        let entries = self.lock();
        self.block_from(&entries)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Tone, String)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn block_from(&self, entries: &[(Tone, String)]) -> AnnotationBlock {
        AnnotationBlock {
            context: self.context.clone(),
            style: AnnotationStyle::Warning,
            title: format!(":bk-status-failed: {}", self.project),
            lines: entries.iter().map(|(tone, text)| tone.paint(text)).collect(),
            append: false,
        }
    }

    async fn publish(&self, block: AnnotationBlock) {
        if let Err(e) = self.sink.publish(&block).await {
            warn!(project = %self.project, error = %e, "failed to publish transcript");
        }
    }
}

#[async_trait]
impl WaitObserver for Transcript {
    /// Consecutive "Waiting for ..." lines collapse into the latest one.
    async fn waiting(&self, message: &str) {
        let block = {
            let mut entries = self.lock();
            let collapses = matches!(
                entries.last(),
                Some((Tone::Info, last)) if last.starts_with(WAITING_PREFIX)
            );
            if collapses {
                entries.pop();
            }
            entries.push((Tone::Info, message.to_string()));
            self.block_from(&entries)
        };
        debug!(project = %self.project, %message, "waiting");
        self.publish(block).await;
    }
}

/// Success lines of every project, published as one shared block.
#[derive(Clone)]
pub struct SuccessLog {
    entries: Arc<tokio::sync::Mutex<Vec<(String, String)>>>,
    sink: Arc<dyn ProgressSink>,
}

impl SuccessLog {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            entries: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            sink,
        }
    }

    /// Append under the lock and republish while still holding it, so
    /// concurrent workers never publish a stale snapshot last.
    pub async fn record(&self, project: &str, text: &str) {
        let mut entries = self.entries.lock().await;
        entries.push((project.to_string(), text.to_string()));
        let block = AnnotationBlock {
            context: SUCCESS_CONTEXT.to_string(),
            style: AnnotationStyle::Success,
            title: ":bk-status-passed: Success".to_string(),
            lines: entries
                .iter()
                .map(|(project, text)| {
                    format!(
                        "{}Analyzing {project}: {}{text}{ANSI_RESET}",
                        Tone::Header.ansi(),
                        Tone::Passed.ansi()
                    )
                })
                .collect(),
            append: false,
        };
        info!(project, "{text}");
        if let Err(e) = self.sink.publish(&block).await {
            warn!(project, error = %e, "failed to publish success log");
        }
    }

    /// `(project, text)` pairs in the order they were recorded.
    pub async fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().await.clone()
    }
}
