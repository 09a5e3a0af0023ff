//! Result Extractor: raw build records to normalized [`BuildResult`]s.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::domain::{BuildResult, CommitId, ProjectConfig, TaskResult, TaskState};
use crate::source::{BuildRecord, JobRecord};

/// Command flag carrying the logical task identity.
pub const TASK_FLAG: &str = "task";
/// Command flag carrying the project's CI configuration URL.
pub const HTTP_CONFIG_FLAG: &str = "http_config";
/// Command flag carrying the project commit a downstream job ran at.
pub const GIT_COMMIT_FLAG: &str = "git_commit";

fn flag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"--([A-Za-z0-9_]+)=("[^"]*"|\S+)"#).expect("flag pattern is a valid regex")
    })
}

/// Parse every `--flag=value` pair in a job command.
///
/// Surrounding double quotes are stripped from values. A flag given twice
/// keeps its last value.
pub fn parse_command_flags(command: &str) -> BTreeMap<String, String> {
    flag_pattern()
        .captures_iter(command)
        .map(|caps| {
            let value = caps[2].trim_matches('"').to_string();
            (caps[1].to_string(), value)
        })
        .collect()
}

/// One runner job with its logical task name and recovered flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub task: String,
    pub flags: BTreeMap<String, String>,
    pub result: TaskResult,
}

/// Extract the task identity of a runner job.
///
/// Returns `None` when the job is not a runner job, when `--task=` or any of
/// `extra_keys` is missing from its command, or when the job lacks one of
/// `id`, `name`, `state`, `web_url`.
pub fn extract_job_info(
    job: &JobRecord,
    runner_marker: &str,
    extra_keys: &[&str],
) -> Option<JobInfo> {
    let command = job.command.as_deref()?;
    if !command.contains(runner_marker) {
        return None;
    }

    let mut flags = parse_command_flags(command);
    let task = flags.remove(TASK_FLAG)?;
    if let Some(missing) = extra_keys.iter().find(|key| !flags.contains_key(**key)) {
        debug!(task = %task, flag = %missing, "runner job without required flag");
        return None;
    }

    let result = TaskResult::new(
        job.id.clone()?,
        job.name.clone()?,
        TaskState::from(job.state.as_deref()?),
        job.web_url.clone()?,
    );
    Some(JobInfo {
        task,
        flags,
        result,
    })
}

/// Index job infos by task name; a later job for the same task wins.
pub fn group_by_task(infos: impl IntoIterator<Item = JobInfo>) -> BTreeMap<String, TaskResult> {
    infos
        .into_iter()
        .map(|info| (info.task, info.result))
        .collect()
}

/// Normalize a project's own (main) build.
pub fn build_result(record: &BuildRecord, runner_marker: &str) -> BuildResult {
    let infos = record
        .jobs
        .iter()
        .filter_map(|job| extract_job_info(job, runner_marker, &[]));
    BuildResult::new(record.commit_id(), record.number, group_by_task(infos))
}

/// Split one downstream build into a result per registered project.
///
/// Jobs are tied to projects through `--http_config=`; the project commit
/// comes from `--git_commit=` and the toolchain commit is the downstream
/// build's own commit. Jobs for unregistered configurations are skipped.
pub fn downstream_results_by_project(
    record: &BuildRecord,
    projects: &[ProjectConfig],
    runner_marker: &str,
) -> BTreeMap<String, BuildResult> {
    let by_config: BTreeMap<&str, &str> = projects
        .iter()
        .map(|p| (p.http_config.as_str(), p.name.as_str()))
        .collect();

    let mut commits: BTreeMap<String, CommitId> = BTreeMap::new();
    let mut jobs: BTreeMap<String, Vec<JobInfo>> = BTreeMap::new();
    for job in &record.jobs {
        let Some(info) = extract_job_info(job, runner_marker, &[HTTP_CONFIG_FLAG, GIT_COMMIT_FLAG])
        else {
            continue;
        };
        let config = &info.flags[HTTP_CONFIG_FLAG];
        let Some(project) = by_config.get(config.as_str()) else {
            warn!(
                http_config = %config,
                task = %info.task,
                "downstream job for unregistered project"
            );
            continue;
        };
        commits
            .entry(project.to_string())
            .or_insert_with(|| CommitId::new(info.flags[GIT_COMMIT_FLAG].clone()));
        jobs.entry(project.to_string()).or_default().push(info);
    }

    jobs.into_iter()
        .filter_map(|(project, infos)| {
            let commit = commits.remove(&project)?;
            let result = BuildResult::new(commit, record.number, group_by_task(infos))
                .with_toolchain_commit(record.commit_id());
            Some((project, result))
        })
        .collect()
}
