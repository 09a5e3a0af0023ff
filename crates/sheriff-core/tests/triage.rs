//! Concurrent triage over several projects.

use std::sync::Arc;

use sheriff_core::bisect::RemoteBisector;
use sheriff_core::fakes::{RecordingSink, ScriptedBisector, ScriptedBuildSource, StaticLastGreen};
use sheriff_core::transcript::SUCCESS_CONTEXT;
use sheriff_core::{
    BuildRecord, CommitId, JobRecord, PipelineSettings, ProjectConfig, Sheriff, SheriffError,
    SuccessLog, TriageContext,
};

const DOWNSTREAM: &str = "bazel-at-head-plus-downstream";

fn green() -> CommitId {
    CommitId::new("9".repeat(40))
}

fn project(name: &str) -> ProjectConfig {
    ProjectConfig {
        name: name.to_string(),
        pipeline_slug: format!("{name}-pipeline"),
        git_repository: format!("https://github.com/example/{name}.git"),
        http_config: format!("https://example.com/{name}.yml"),
    }
}

fn runner_job(id: &str, task: &str, state: &str, extra: &str) -> JobRecord {
    JobRecord {
        id: Some(id.to_string()),
        name: Some(format!("{id} {task}")),
        state: Some(state.to_string()),
        web_url: Some(format!("https://ci/job/{id}")),
        command: Some(format!("python3 bazelci.py runner --task={task} {extra}")),
        raw_log_url: None,
    }
}

fn downstream_job(id: &str, project: &str, state: &str) -> JobRecord {
    runner_job(
        id,
        "ubuntu",
        state,
        &format!(
            "--http_config=https://example.com/{project}.yml --git_commit={}",
            "1".repeat(40)
        ),
    )
}

fn main_build(commit: &CommitId, state: &str) -> BuildRecord {
    BuildRecord {
        number: 3,
        commit: commit.to_string(),
        state: state.to_string(),
        web_url: "https://ci/main/3".to_string(),
        jobs: vec![runner_job("main", "ubuntu", state, "")],
    }
}

fn downstream_build() -> BuildRecord {
    BuildRecord {
        number: 77,
        commit: "b".repeat(40),
        state: "failed".to_string(),
        web_url: "https://ci/downstream/77".to_string(),
        jobs: vec![
            downstream_job("a1", "alpha", "passed"),
            downstream_job("b1", "beta", "failed"),
            downstream_job("c1", "gamma", "passed"),
            downstream_job("x1", "unregistered", "failed"),
            JobRecord {
                id: Some("upload".to_string()),
                command: Some("buildkite-agent pipeline upload".to_string()),
                ..JobRecord::default()
            },
        ],
    }
}

fn context(source: Arc<ScriptedBuildSource>, sink: Arc<RecordingSink>) -> TriageContext {
    TriageContext {
        source,
        last_green: Arc::new(
            StaticLastGreen::new()
                .with_commit("alpha", green())
                .with_commit("beta", green())
                .with_commit("gamma", green()),
        ),
        bisector: Arc::new(ScriptedBisector::new()),
        sink: sink.clone(),
        success_log: SuccessLog::new(sink),
        settings: PipelineSettings::default(),
    }
}

#[tokio::test]
async fn workers_are_independent_and_failures_are_collected() {
    let source = Arc::new(
        ScriptedBuildSource::new()
            .with_build(DOWNSTREAM, downstream_build())
            .with_build("alpha-pipeline", main_build(&CommitId::new("2".repeat(40)), "passed"))
            // beta failed at its last green commit: infra.
            .with_build("beta-pipeline", main_build(&green(), "failed")),
        // gamma has no finished main build.
    );
    let sink = Arc::new(RecordingSink::new());
    let projects = vec![project("alpha"), project("beta"), project("gamma"), project("delta")];
    let sheriff = Sheriff::new(context(source.clone(), sink.clone()), projects);

    let report = sheriff.triage().await.unwrap();

    let analyzed: Vec<&str> = report.projects.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(analyzed, vec!["alpha", "beta"]);
    assert_eq!(report.broken_by_infra, vec!["beta".to_string()]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].project, "gamma");
    assert!(report.failures[0].error.contains("gamma-pipeline"));
    assert!(report.broken_downstream.is_empty());
    assert!(!report.is_clean());

    let success = sink.latest(SUCCESS_CONTEXT).expect("success block");
    assert_eq!(success.lines.len(), 1);
    assert!(success.lines[0].contains("alpha"));

    let downstream = &report.projects[0].downstream_result;
    assert_eq!(downstream.build_number, 77);
    assert_eq!(downstream.toolchain_commit, Some(CommitId::new("b".repeat(40))));
    assert_eq!(source.total_retries(), 0);
}

#[tokio::test]
async fn triage_without_finished_downstream_build_fails() {
    let source = Arc::new(ScriptedBuildSource::new());
    let sheriff = Sheriff::new(
        context(source, Arc::new(RecordingSink::new())),
        vec![project("alpha")],
    );

    let err = sheriff.triage().await.unwrap_err();
    assert!(
        matches!(err, SheriffError::NoFinishedBuild { ref pipeline } if pipeline == DOWNSTREAM)
    );
}

#[tokio::test]
async fn all_green_build_yields_clean_report() {
    let mut build = downstream_build();
    build.jobs.retain(|j| j.id.as_deref() == Some("a1"));
    let source = Arc::new(
        ScriptedBuildSource::new()
            .with_build("alpha-pipeline", main_build(&CommitId::new("2".repeat(40)), "passed")),
    );
    let sheriff = Sheriff::new(
        context(source, Arc::new(RecordingSink::new())),
        vec![project("alpha"), project("beta")],
    );

    let report = sheriff.triage_build(&build).await;
    assert!(report.is_clean());
    assert_eq!(report.projects.len(), 1);
}

#[tokio::test]
async fn failed_bisection_keeps_the_classified_project_in_the_report() {
    let mut build = downstream_build();
    build.jobs.retain(|j| j.id.as_deref() == Some("a1"));
    build.jobs[0] = downstream_job("a1", "alpha", "failed");
    let source = Arc::new(
        ScriptedBuildSource::new()
            .with_build("alpha-pipeline", main_build(&CommitId::new("2".repeat(40)), "passed"))
            .with_retry_state(DOWNSTREAM, "a1", "failed")
            // The culprit-finder build comes back without a job for the task.
            .with_triggered_state("culprit-finder", "passed"),
    );
    let mut ctx = context(source.clone(), Arc::new(RecordingSink::new()));
    ctx.bisector = Arc::new(RemoteBisector::new(source.clone(), "culprit-finder"));
    let sheriff = Sheriff::new(ctx, vec![project("alpha")]);

    let report = sheriff.triage_build(&build).await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].project, "alpha");
    assert!(report.failures[0].error.contains("ubuntu"));

    let analyzed: Vec<&str> = report.projects.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(analyzed, vec!["alpha"]);
    assert!(report.projects[0].downstream_result.tasks["ubuntu"].broken);
    assert_eq!(report.broken_downstream.len(), 1);
    assert_eq!(report.broken_downstream[0].project, "alpha");
    assert_eq!(report.broken_downstream[0].tasks[0].task, "ubuntu");
    assert!(report.broken_downstream[0].culprits.is_empty());
    assert_eq!(source.total_retries(), 1);
    assert_eq!(source.triggered("culprit-finder").len(), 1);
}
