//! Auto-sheriff CLI
//!
//! The `auto-sheriff` command triages the toolchain's downstream pipeline and
//! runs culprit-finder bisections.
//!
//! ## Commands
//!
//! - `triage`: classify every project's failures in the latest downstream build
//! - `bisect`: find the first toolchain commit that breaks one project task
//! - `projects`: list the registered projects

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::builder::FalseyValueParser;
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use sheriff_buildkite::{
    BuildkiteAnnotator, BuildkiteClient, BuildkiteConfig, HttpLastGreenCommit,
};
use sheriff_core::{
    BisectRequest, BisectionEngine, Bisector, BuildRecordSource, CommitId, GitHistory,
    LocalBisector, PipelineProbe, ProgressSink, RemoteBisector, Sheriff, SheriffConfig,
    SheriffError, SuccessLog, TracingSink, TriageContext,
};

#[derive(Parser)]
#[command(name = "auto-sheriff")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Triage downstream failures and bisect toolchain culprits", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Sheriff configuration file (built-in defaults if it does not exist)
    #[arg(
        short,
        long,
        global = true,
        env = "SHERIFF_CONFIG",
        default_value = "sheriff.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the latest finished downstream build
    Triage {
        /// Analyze this downstream build number instead of the latest one
        #[arg(long)]
        build: Option<u64>,

        /// Write the triage report as JSON to this path
        #[arg(long)]
        report_json: Option<PathBuf>,

        /// Log transcripts instead of publishing Buildkite annotations
        #[arg(long)]
        local_annotations: bool,

        /// Bisect in process against this toolchain checkout instead of
        /// triggering culprit-finder builds
        #[arg(long, env = "TOOLCHAIN_REPO")]
        toolchain_repo: Option<PathBuf>,
    },

    /// Find the first bad toolchain commit for one project task
    Bisect {
        /// Registered project name
        #[arg(long = "project_name", env = "PROJECT_NAME")]
        project_name: String,

        /// Task (platform) of the project to probe
        #[arg(long = "task_name", env = "TASK_NAME")]
        task_name: String,

        /// Toolchain commit at which the task is known to pass
        #[arg(long = "good_bazel_commit", env = "GOOD_BAZEL_COMMIT")]
        good_bazel_commit: String,

        /// Toolchain commit at which the task fails
        #[arg(long = "bad_bazel_commit", env = "BAD_BAZEL_COMMIT")]
        bad_bazel_commit: String,

        /// Run every probe in a clean workspace
        #[arg(
            long = "needs_clean",
            env = "NEEDS_CLEAN",
            value_parser = FalseyValueParser::new()
        )]
        needs_clean: bool,

        /// Probe attempts per commit; a commit is good only if all pass
        #[arg(
            long = "repeat_times",
            env = "REPEAT_TIMES",
            default_value_t = 1,
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        repeat_times: u32,

        /// Local checkout of the toolchain repository
        #[arg(long, env = "TOOLCHAIN_REPO", default_value = ".")]
        toolchain_repo: PathBuf,

        /// Write the bisection report as JSON to this path
        #[arg(long)]
        report_json: Option<PathBuf>,
    },

    /// List registered projects
    Projects,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    sheriff_core::init_tracing(cli.json, level);

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Triage {
            build,
            report_json,
            local_annotations,
            toolchain_repo,
        } => {
            cmd_triage(
                &config,
                build,
                report_json.as_deref(),
                local_annotations,
                toolchain_repo,
            )
            .await
        }
        Commands::Bisect {
            project_name,
            task_name,
            good_bazel_commit,
            bad_bazel_commit,
            needs_clean,
            repeat_times,
            toolchain_repo,
            report_json,
        } => {
            let request = BisectRequest {
                project: project_name,
                task: task_name,
                good: CommitId::new(good_bazel_commit),
                bad: CommitId::new(bad_bazel_commit),
            };
            cmd_bisect(
                &config,
                request,
                needs_clean,
                repeat_times,
                toolchain_repo,
                report_json.as_deref(),
            )
            .await
        }
        Commands::Projects => {
            for project in &config.projects {
                println!(
                    "{}\t{}\t{}",
                    project.name, project.pipeline_slug, project.git_repository
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: &Path) -> Result<SheriffConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(SheriffConfig::default());
    }
    SheriffConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

fn buildkite_settings(config: &SheriffConfig) -> Result<BuildkiteConfig> {
    let settings = BuildkiteConfig::from_env(&config.buildkite.org)
        .context("invalid Buildkite client settings")?;
    if settings.token.is_none() {
        warn!("BUILDKITE_API_TOKEN is not set, requests are unauthenticated");
    }
    Ok(settings)
}

fn buildkite_source(config: &SheriffConfig) -> Result<Arc<dyn BuildRecordSource>> {
    Ok(Arc::new(BuildkiteClient::new(buildkite_settings(config)?)))
}

fn local_engine(
    config: &SheriffConfig,
    source: Arc<dyn BuildRecordSource>,
    toolchain_repo: PathBuf,
    needs_clean: bool,
    repeat_times: u32,
) -> BisectionEngine {
    let probe = PipelineProbe::new(source, config.buildkite.probe_pipeline.clone())
        .with_needs_clean(needs_clean)
        .with_repeat_times(repeat_times);
    BisectionEngine::new(Arc::new(GitHistory::new(toolchain_repo)), Arc::new(probe))
}

async fn cmd_triage(
    config: &SheriffConfig,
    build: Option<u64>,
    report_json: Option<&Path>,
    local_annotations: bool,
    toolchain_repo: Option<PathBuf>,
) -> Result<ExitCode> {
    let settings = buildkite_settings(config)?;
    // The last green lookup shares the API client's retry budget.
    let last_green = HttpLastGreenCommit::new(&config.last_green.base_url)
        .with_retries(settings.max_attempts, settings.retry_delay);
    let source: Arc<dyn BuildRecordSource> = Arc::new(BuildkiteClient::new(settings));
    let sink: Arc<dyn ProgressSink> = if local_annotations {
        Arc::new(TracingSink)
    } else {
        Arc::new(BuildkiteAnnotator::new())
    };
    let bisect = &config.bisect;
    let bisector: Arc<dyn Bisector> = match toolchain_repo {
        Some(repo) => Arc::new(LocalBisector::new(local_engine(
            config,
            Arc::clone(&source),
            repo,
            bisect.needs_clean,
            bisect.repeat_times,
        ))),
        None => Arc::new(
            RemoteBisector::new(
                Arc::clone(&source),
                config.buildkite.culprit_finder_pipeline.clone(),
            )
            .with_needs_clean(bisect.needs_clean)
            .with_repeat_times(bisect.repeat_times),
        ),
    };

    let ctx = TriageContext {
        source: Arc::clone(&source),
        last_green: Arc::new(last_green),
        bisector,
        success_log: SuccessLog::new(Arc::clone(&sink)),
        sink,
        settings: config.buildkite.clone(),
    };
    let sheriff = Sheriff::new(ctx, config.projects.clone());

    let report = match build {
        Some(number) => {
            let record = source
                .get_build(&config.buildkite.downstream_pipeline, number)
                .await
                .with_context(|| format!("failed to fetch downstream build #{number}"))?;
            sheriff.triage_build(&record).await
        }
        None => sheriff.triage().await.context("triage failed")?,
    };

    if let Some(path) = report_json {
        let json = report.to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    Ok(ExitCode::SUCCESS)
}

async fn cmd_bisect(
    config: &SheriffConfig,
    mut request: BisectRequest,
    needs_clean: bool,
    repeat_times: u32,
    toolchain_repo: PathBuf,
    report_json: Option<&Path>,
) -> Result<ExitCode> {
    // Unknown projects fail before anything is triggered.
    request.project = config.project(&request.project)?.name.clone();

    let source = buildkite_source(config)?;
    let engine = local_engine(config, source, toolchain_repo, needs_clean, repeat_times);

    match engine.run(&request).await {
        Ok(report) => {
            println!("{}", report.transcript());
            if let Some(path) = report_json {
                let json = serde_json::to_string_pretty(&report)?;
                std::fs::write(path, json)
                    .with_context(|| format!("failed to write report to {}", path.display()))?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ SheriffError::GoodCommitRegressed { .. }) => {
            println!("{e}");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("bisection failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_triage() {
        let cli = Cli::try_parse_from([
            "auto-sheriff",
            "--config",
            "ci/sheriff.toml",
            "triage",
            "--report-json",
            "report.json",
            "--local-annotations",
            "--build",
            "4242",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("ci/sheriff.toml"));
        match cli.command {
            Commands::Triage {
                build,
                report_json,
                local_annotations,
                ..
            } => {
                assert_eq!(build, Some(4242));
                assert_eq!(report_json, Some(PathBuf::from("report.json")));
                assert!(local_annotations);
            }
            _ => panic!("expected triage"),
        }
    }

    #[test]
    fn test_parse_bisect_flags() {
        let cli = Cli::try_parse_from([
            "auto-sheriff",
            "bisect",
            "--project_name",
            "rules_go",
            "--task_name",
            "ubuntu2004",
            "--good_bazel_commit",
            "1111111111111111111111111111111111111111",
            "--bad_bazel_commit",
            "2222222222222222222222222222222222222222",
            "--needs_clean",
            "--repeat_times",
            "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Bisect {
                project_name,
                needs_clean,
                repeat_times,
                toolchain_repo,
                ..
            } => {
                assert_eq!(project_name, "rules_go");
                assert!(needs_clean);
                assert_eq!(repeat_times, 3);
                assert_eq!(toolchain_repo, PathBuf::from("."));
            }
            _ => panic!("expected bisect"),
        }
    }

    #[test]
    fn test_bisect_rejects_zero_repeats() {
        let result = Cli::try_parse_from([
            "auto-sheriff",
            "bisect",
            "--project_name",
            "rules_go",
            "--task_name",
            "ubuntu2004",
            "--good_bazel_commit",
            "a",
            "--bad_bazel_commit",
            "b",
            "--repeat_times",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_bisect_accepts_culprit_finder_style_flags() {
        let cli = Cli::try_parse_from([
            "auto-sheriff",
            "bisect",
            "--project_name=rules_go",
            "--task_name=ubuntu2004",
            "--good_bazel_commit=1111111111111111111111111111111111111111",
            "--bad_bazel_commit=2222222222222222222222222222222222222222",
        ])
        .unwrap();
        match cli.command {
            Commands::Bisect {
                project_name,
                task_name,
                good_bazel_commit,
                bad_bazel_commit,
                repeat_times,
                ..
            } => {
                assert_eq!(project_name, "rules_go");
                assert_eq!(task_name, "ubuntu2004");
                assert_eq!(good_bazel_commit, "1".repeat(40));
                assert_eq!(bad_bazel_commit, "2".repeat(40));
                assert_eq!(repeat_times, 1);
            }
            _ => panic!("expected bisect"),
        }
    }

    #[test]
    fn test_bisect_rejects_dashed_flag_spelling() {
        let result = Cli::try_parse_from([
            "auto-sheriff",
            "bisect",
            "--project_name=rules_go",
            "--task-name=ubuntu2004",
            "--good_bazel_commit=a",
            "--bad_bazel_commit=b",
        ]);
        let err = result.err().expect("dashed spelling is rejected");
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_missing_config_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join("auto-sheriff-no-such-config.toml");
        let config = load_config(&dir).unwrap();
        assert_eq!(config, SheriffConfig::default());
    }

    #[tokio::test]
    async fn test_bisect_unknown_project_fails_before_remote_calls() {
        let request = BisectRequest {
            project: "rules_nope".to_string(),
            task: "ubuntu2004".to_string(),
            good: CommitId::new("a"),
            bad: CommitId::new("b"),
        };
        let err = cmd_bisect(
            &SheriffConfig::default(),
            request,
            false,
            1,
            PathBuf::from("."),
            None,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("rules_nope"));
    }
}
