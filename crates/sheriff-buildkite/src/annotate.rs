//! Publishes transcripts as Buildkite annotations via `buildkite-agent`.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use sheriff_core::transcript::{AnnotationBlock, ProgressSink};
use sheriff_core::SheriffResult;

use crate::error::{BuildkiteError, Result};

pub const DEFAULT_AGENT: &str = "buildkite-agent";

/// Render a block as a collapsible annotation with a terminal-styled body.
pub fn render_block(block: &AnnotationBlock) -> String {
    format!(
        "<details><summary><strong>{}</strong></summary><p>\n\n```term\n{}\n```\n\n</p></details>",
        block.title,
        block.lines.join("\n")
    )
}

/// [`ProgressSink`] that shells out to `buildkite-agent annotate`.
pub struct BuildkiteAnnotator {
    agent: String,
}

impl BuildkiteAnnotator {
    pub fn new() -> Self {
        Self::with_agent(DEFAULT_AGENT)
    }

    /// Use a different agent executable.
    pub fn with_agent(agent: &str) -> Self {
        BuildkiteAnnotator {
            agent: agent.to_string(),
        }
    }

    fn args(block: &AnnotationBlock) -> Vec<String> {
        let mut args = vec!["annotate".to_string()];
        if block.append {
            args.push("--append".to_string());
        }
        args.push(format!("--context={}", block.context));
        args.push(format!("--style={}", block.style.as_str()));
        args.push(format!("\n{}\n", render_block(block)));
        args
    }

    async fn annotate(&self, block: &AnnotationBlock) -> Result<()> {
        let output = Command::new(&self.agent)
            .args(Self::args(block))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BuildkiteError::Agent(format!("failed to run {}: {e}", self.agent)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildkiteError::Agent(format!(
                "annotate --context={} exited with {}: {}",
                block.context,
                output.status,
                stderr.trim()
            )));
        }
        debug!(context = %block.context, lines = block.lines.len(), "annotation published");
        Ok(())
    }
}

impl Default for BuildkiteAnnotator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressSink for BuildkiteAnnotator {
    async fn publish(&self, block: &AnnotationBlock) -> SheriffResult<()> {
        Ok(self.annotate(block).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheriff_core::transcript::AnnotationStyle;

    fn block(append: bool) -> AnnotationBlock {
        AnnotationBlock {
            context: "rules-go".to_string(),
            style: AnnotationStyle::Warning,
            title: ":bk-status-failed: rules_go".to_string(),
            lines: vec!["Analyzing rules_go: ".to_string(), "Analyzing finished.".to_string()],
            append,
        }
    }

    #[test]
    fn test_render_block() {
        let rendered = render_block(&block(false));
        assert!(rendered.starts_with(
            "<details><summary><strong>:bk-status-failed: rules_go</strong></summary><p>"
        ));
        assert!(rendered.contains("```term\nAnalyzing rules_go: \nAnalyzing finished.\n```"));
        assert!(rendered.ends_with("</p></details>"));
    }

    #[test]
    fn test_args_append_flag() {
        let args = BuildkiteAnnotator::args(&block(true));
        assert_eq!(args[0], "annotate");
        assert_eq!(args[1], "--append");
        assert_eq!(args[2], "--context=rules-go");
        assert_eq!(args[3], "--style=warning");
        assert!(args[4].starts_with("\n<details>"));

        let args = BuildkiteAnnotator::args(&block(false));
        assert!(!args.contains(&"--append".to_string()));
    }

    #[tokio::test]
    async fn test_publish_reports_agent_failure() {
        let ok = BuildkiteAnnotator::with_agent("true");
        assert!(ok.publish(&block(false)).await.is_ok());

        let failing = BuildkiteAnnotator::with_agent("false");
        let err = failing.publish(&block(false)).await.unwrap_err();
        assert!(err.to_string().contains("buildkite-agent failed"));

        let missing = BuildkiteAnnotator::with_agent("/nonexistent/buildkite-agent");
        assert!(missing.publish(&block(false)).await.is_err());
    }
}
