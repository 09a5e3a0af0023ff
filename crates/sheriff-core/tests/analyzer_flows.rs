//! Every branch of the per-project classification state machine.

use std::collections::BTreeMap;
use std::sync::Arc;

use sheriff_core::bisect::{BisectionEngine, LocalBisector};
use sheriff_core::culprit::{BisectVerdict, BisectionOutcome};
use sheriff_core::fakes::{
    FakeHistory, RecordingSink, ScriptedBisector, ScriptedBuildSource, ScriptedProbe,
    StaticLastGreen,
};
use sheriff_core::{
    BuildInfoAnalyzer, BuildRecord, BuildResult, Bisector, CommitId, JobRecord, PipelineSettings,
    ProjectConfig, ProjectOutcome, SheriffError, SuccessLog, TaskResult, TaskState, TriageContext,
};

const MAIN: &str = "rules-foo";
const DOWNSTREAM: &str = "bazel-at-head-plus-downstream";

fn sha(n: u32) -> CommitId {
    CommitId::new(format!("{n:040x}"))
}

fn project_commit() -> CommitId {
    CommitId::new("1".repeat(40))
}

fn last_green() -> CommitId {
    CommitId::new("9".repeat(40))
}

fn config() -> ProjectConfig {
    ProjectConfig {
        name: "rules_foo".to_string(),
        pipeline_slug: MAIN.to_string(),
        git_repository: "https://github.com/example/rules_foo.git".to_string(),
        http_config: "https://example.com/rules_foo.yml".to_string(),
    }
}

fn main_build(commit: &CommitId, tasks: &[(&str, &str)]) -> BuildRecord {
    BuildRecord {
        number: 41,
        commit: commit.to_string(),
        state: "failed".to_string(),
        web_url: format!("https://ci/{MAIN}/41"),
        jobs: tasks
            .iter()
            .map(|(task, state)| JobRecord {
                id: Some(format!("main-{task}")),
                name: Some(format!(":ubuntu: {task}")),
                state: Some(state.to_string()),
                web_url: Some(format!("https://ci/{MAIN}/41#main-{task}")),
                command: Some(format!("python3 bazelci.py runner --task={task}")),
                raw_log_url: None,
            })
            .collect(),
    }
}

fn downstream(tasks: &[(&str, TaskState)], toolchain: CommitId) -> BuildResult {
    let tasks: BTreeMap<String, TaskResult> = tasks
        .iter()
        .map(|(task, state)| {
            (
                task.to_string(),
                TaskResult::new(
                    format!("ds-{task}"),
                    format!("rules_foo ({task})"),
                    state.clone(),
                    format!("https://ci/{DOWNSTREAM}/7#ds-{task}"),
                ),
            )
        })
        .collect();
    BuildResult::new(project_commit(), 7, tasks).with_toolchain_commit(toolchain)
}

struct Harness {
    source: Arc<ScriptedBuildSource>,
    sink: Arc<RecordingSink>,
    success_log: SuccessLog,
    ctx: TriageContext,
}

fn harness(
    source: ScriptedBuildSource,
    bisector: Arc<dyn Bisector>,
    green: Option<CommitId>,
) -> Harness {
    let source = Arc::new(source);
    let sink = Arc::new(RecordingSink::new());
    let success_log = SuccessLog::new(sink.clone());
    let last_green = match green {
        Some(commit) => StaticLastGreen::new().with_commit("rules_foo", commit),
        None => StaticLastGreen::new(),
    };
    let ctx = TriageContext {
        source: source.clone(),
        last_green: Arc::new(last_green),
        bisector,
        sink: sink.clone(),
        success_log: success_log.clone(),
        settings: PipelineSettings::default(),
    };
    Harness {
        source,
        sink,
        success_log,
        ctx,
    }
}

impl Harness {
    fn analyzer(&self, tasks: &[(&str, TaskState)], toolchain: CommitId) -> BuildInfoAnalyzer {
        BuildInfoAnalyzer::new(config(), downstream(tasks, toolchain), self.ctx.clone())
    }
}

fn transcript_contains(sink: &RecordingSink, needle: &str) -> bool {
    sink.latest(MAIN)
        .map(|block| block.lines.iter().any(|l| l.contains(needle)))
        .unwrap_or(false)
}

fn culprit_outcome(commit: &CommitId) -> BisectionOutcome {
    BisectionOutcome {
        verdict: BisectVerdict::CulpritFound,
        message: format!("Culprit found!\nfirst bad commit is {commit}"),
        culprit: Some(commit.clone()),
    }
}

#[tokio::test]
async fn passed_passed_records_success_only() {
    let source = ScriptedBuildSource::new()
        .with_build(MAIN, main_build(&project_commit(), &[("ubuntu", "passed")]));
    let bisector = Arc::new(ScriptedBisector::new());
    let h = harness(source, bisector.clone(), Some(last_green()));

    let project = h
        .analyzer(&[("ubuntu", TaskState::Passed), ("macos", TaskState::SoftFailed)], sha(5))
        .run()
        .await
        .unwrap();

    assert!(!project.broken_by_infra);
    assert_eq!(
        h.success_log.entries().await,
        vec![(
            "rules_foo".to_string(),
            "Main build: PASSED; Downstream build: PASSED".to_string()
        )]
    );
    assert_eq!(h.source.total_retries(), 0);
    assert!(bisector.calls().is_empty());
    assert!(h.sink.latest(MAIN).is_none());
}

#[tokio::test]
async fn failed_passed_retries_main_only_and_never_bisects() {
    let source = ScriptedBuildSource::new()
        .with_build(
            MAIN,
            main_build(
                &project_commit(),
                &[("ubuntu", "failed"), ("macos", "failed"), ("windows", "passed")],
            ),
        )
        .with_retry_state(MAIN, "main-ubuntu", "passed")
        .with_retry_state(MAIN, "main-macos", "failed");
    let bisector = Arc::new(ScriptedBisector::new());
    let h = harness(source, bisector.clone(), Some(last_green()));

    let project = h.analyzer(&[("ubuntu", TaskState::Passed)], sha(5)).run().await.unwrap();

    assert!(project.main_result.tasks["ubuntu"].flaky);
    assert!(project.main_result.tasks["macos"].broken);
    assert!(!project.main_result.tasks["windows"].broken);
    assert_eq!(h.source.retried_jobs(MAIN), vec!["main-macos", "main-ubuntu"]);
    assert!(h.source.retried_jobs(DOWNSTREAM).is_empty());
    assert!(bisector.calls().is_empty());
    assert!(transcript_contains(&h.sink, "probably broken due to changes from the project itself"));
    let green_note = format!("The last recorded green commit is {}", last_green());
    assert!(transcript_contains(&h.sink, &green_note));
    assert!(transcript_contains(&h.sink, "Analyzing finished."));
}

#[tokio::test]
async fn passed_failed_bisects_exactly_the_still_failing_tasks() {
    let toolchain = sha(4);
    let source = ScriptedBuildSource::new()
        .with_build(MAIN, main_build(&project_commit(), &[("ubuntu", "passed")]))
        .with_retry_state(DOWNSTREAM, "ds-ubuntu", "failed")
        .with_retry_state(DOWNSTREAM, "ds-macos", "passed");
    let bisector =
        Arc::new(ScriptedBisector::new().with_outcome("ubuntu", culprit_outcome(&sha(3))));
    let h = harness(source, bisector.clone(), Some(last_green()));

    let tasks = [
        ("ubuntu", TaskState::Failed),
        ("macos", TaskState::Failed),
        ("windows", TaskState::Passed),
    ];
    let project = h.analyzer(&tasks, toolchain.clone()).run().await.unwrap();

    let calls = bisector.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tasks, vec!["ubuntu".to_string()]);
    assert_eq!(calls[0].good, last_green());
    assert_eq!(calls[0].bad, toolchain);

    let ubuntu = &project.downstream_result.tasks["ubuntu"];
    assert!(ubuntu.broken);
    assert_eq!(ubuntu.culprit, Some(sha(3)));
    assert!(project.downstream_result.tasks["macos"].flaky);
    assert!(h.source.retried_jobs(MAIN).is_empty());
    assert!(transcript_contains(&h.sink, "Bisect result for rules_foo (ubuntu)"));
}

#[tokio::test]
async fn passed_failed_end_to_end_with_local_bisection() {
    let commits: Vec<CommitId> = (1..=4).map(sha).collect();
    let history = Arc::new(FakeHistory::new(commits.clone()));
    let probe = Arc::new(ScriptedProbe::first_bad_at(&commits, Some(2)));
    let engine = BisectionEngine::new(history.clone(), probe.clone());
    let bisector = Arc::new(LocalBisector::new(engine));

    let source = ScriptedBuildSource::new()
        .with_build(MAIN, main_build(&project_commit(), &[("T", "passed")]))
        .with_retry_state(DOWNSTREAM, "ds-T", "failed");
    let h = harness(source, bisector, Some(last_green()));

    let project = h.analyzer(&[("T", TaskState::Failed)], commits[3].clone()).run().await.unwrap();

    assert_eq!(history.queries(), vec![(last_green(), commits[3].clone())]);
    // Good-endpoint check, then midpoints at index 1 and 2.
    assert_eq!(probe.calls(), vec![last_green(), commits[1].clone(), commits[2].clone()]);
    assert_eq!(project.downstream_result.tasks["T"].culprit, Some(commits[2].clone()));
    assert!(project.downstream_result.tasks["T"].broken);
    assert!(!project.broken_by_infra);
}

#[tokio::test]
async fn passed_failed_flaky_only_skips_bisection() {
    let source = ScriptedBuildSource::new()
        .with_build(MAIN, main_build(&project_commit(), &[("ubuntu", "passed")]))
        .with_retry_state(DOWNSTREAM, "ds-ubuntu", "passed");
    let bisector = Arc::new(ScriptedBisector::new());
    let h = harness(source, bisector.clone(), Some(last_green()));

    let project = h.analyzer(&[("ubuntu", TaskState::Failed)], sha(4)).run().await.unwrap();

    assert!(project.downstream_result.tasks["ubuntu"].flaky);
    assert!(bisector.calls().is_empty());
}

#[tokio::test]
async fn bisection_infra_signal_marks_project_broken_by_infra() {
    let source = ScriptedBuildSource::new()
        .with_build(MAIN, main_build(&project_commit(), &[("ubuntu", "passed")]))
        .with_retry_state(DOWNSTREAM, "ds-ubuntu", "failed");
    let bisector = Arc::new(ScriptedBisector::new().with_outcome(
        "ubuntu",
        BisectionOutcome {
            verdict: BisectVerdict::GoodCommitRegressed,
            message: "Given good commit is now failing.".to_string(),
            culprit: None,
        },
    ));
    let h = harness(source, bisector, Some(last_green()));

    let project = h.analyzer(&[("ubuntu", TaskState::Failed)], sha(4)).run().await.unwrap();

    assert!(project.broken_by_infra);
    assert!(!project.has_broken_tasks());
}

#[tokio::test]
async fn failed_failed_at_last_green_is_infra_without_retry_or_bisection() {
    let source = ScriptedBuildSource::new()
        .with_build(MAIN, main_build(&last_green(), &[("ubuntu", "failed")]));
    let bisector = Arc::new(ScriptedBisector::new());
    let h = harness(source, bisector.clone(), Some(last_green()));

    let project = h.analyzer(&[("ubuntu", TaskState::Failed)], sha(4)).run().await.unwrap();

    assert!(project.broken_by_infra);
    assert!(!project.has_broken_tasks());
    assert_eq!(h.source.total_retries(), 0);
    assert_eq!(h.source.total_triggers(), 0);
    assert!(bisector.calls().is_empty());
    assert!(transcript_contains(&h.sink, "Project failed at last green commit."));
}

#[tokio::test]
async fn failed_failed_rebuild_failure_is_infra() {
    let source = ScriptedBuildSource::new()
        .with_build(MAIN, main_build(&project_commit(), &[("ubuntu", "failed")]))
        .with_triggered_state(MAIN, "failed");
    let bisector = Arc::new(ScriptedBisector::new());
    let h = harness(source, bisector.clone(), Some(last_green()));

    let project = h.analyzer(&[("ubuntu", TaskState::Failed)], sha(4)).run().await.unwrap();

    assert!(project.broken_by_infra);
    let triggered = h.source.triggered(MAIN);
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0].commit, last_green().to_string());
    assert_eq!(triggered[0].message, "Trigger build at last green commit.");
    assert_eq!(h.source.total_retries(), 0);
    assert!(bisector.calls().is_empty());
}

/// After a passing rebuild both flows run back to back, even if the two
/// failures might share a cause.
#[tokio::test]
async fn failed_failed_rebuild_pass_runs_main_then_downstream_flow() {
    let source = ScriptedBuildSource::new()
        .with_build(MAIN, main_build(&project_commit(), &[("ubuntu", "failed")]))
        .with_triggered_state(MAIN, "passed")
        .with_retry_state(MAIN, "main-ubuntu", "failed")
        .with_retry_state(DOWNSTREAM, "ds-ubuntu", "failed");
    let bisector =
        Arc::new(ScriptedBisector::new().with_outcome("ubuntu", culprit_outcome(&sha(2))));
    let h = harness(source, bisector.clone(), Some(last_green()));

    let project = h.analyzer(&[("ubuntu", TaskState::Failed)], sha(4)).run().await.unwrap();

    assert!(!project.broken_by_infra);
    assert!(project.main_result.tasks["ubuntu"].broken);
    assert!(project.downstream_result.tasks["ubuntu"].broken);
    assert_eq!(project.downstream_result.tasks["ubuntu"].culprit, Some(sha(2)));
    assert_eq!(h.source.retried_jobs(MAIN).len(), 1);
    assert_eq!(h.source.retried_jobs(DOWNSTREAM).len(), 1);
    assert_eq!(bisector.calls().len(), 1);

    let lines = h.sink.latest(MAIN).unwrap().lines;
    let main_pos = lines
        .iter()
        .position(|l| l.contains("Analyze failures in main pipeline"))
        .unwrap();
    let downstream_pos = lines
        .iter()
        .position(|l| l.contains("Analyze failures in downstream pipeline"))
        .unwrap();
    assert!(main_pos < downstream_pos);
}

#[tokio::test]
async fn failed_failed_canceled_rebuild_is_an_analysis_error() {
    let source = ScriptedBuildSource::new()
        .with_build(MAIN, main_build(&project_commit(), &[("ubuntu", "failed")]))
        .with_triggered_state(MAIN, "canceled");
    let h = harness(source, Arc::new(ScriptedBisector::new()), Some(last_green()));

    let err = h.analyzer(&[("ubuntu", TaskState::Failed)], sha(4)).run().await.unwrap_err();

    assert!(
        matches!(err, SheriffError::AmbiguousRebuild { ref state, .. } if state == "canceled")
    );
    assert!(transcript_contains(&h.sink, "failed with unknown reason"));
}

#[tokio::test]
async fn missing_main_build_is_fatal() {
    let bisector = Arc::new(ScriptedBisector::new());
    let h = harness(ScriptedBuildSource::new(), bisector, Some(last_green()));

    let err = h.analyzer(&[("ubuntu", TaskState::Passed)], sha(4)).run().await.unwrap_err();

    assert!(matches!(err, SheriffError::NoFinishedBuild { ref pipeline } if pipeline == MAIN));
    let calls = h.source.list_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.branch, "master");
    assert_eq!(calls[0].1.per_page, 1);
}

#[tokio::test]
async fn bisection_without_last_green_commit_is_an_error() {
    let source = ScriptedBuildSource::new()
        .with_build(MAIN, main_build(&project_commit(), &[("ubuntu", "passed")]))
        .with_retry_state(DOWNSTREAM, "ds-ubuntu", "failed");
    let bisector = Arc::new(ScriptedBisector::new());
    let h = harness(source, bisector.clone(), None);

    let err = h.analyzer(&[("ubuntu", TaskState::Failed)], sha(4)).run().await.unwrap_err();

    assert!(matches!(err, SheriffError::MissingLastGreenCommit { .. }));
    assert!(bisector.calls().is_empty());
}

#[tokio::test]
async fn interrupted_analysis_hands_back_the_classified_project() {
    let source = ScriptedBuildSource::new()
        .with_build(MAIN, main_build(&project_commit(), &[("ubuntu", "passed")]))
        .with_retry_state(DOWNSTREAM, "ds-ubuntu", "failed")
        .with_retry_state(DOWNSTREAM, "ds-macos", "passed");
    let h = harness(source, Arc::new(ScriptedBisector::new()), None);
    let tasks = [("ubuntu", TaskState::Failed), ("macos", TaskState::Failed)];

    let (project, error) = match h.analyzer(&tasks, sha(4)).run_to_outcome().await {
        ProjectOutcome::Interrupted {
            project: Some(project),
            error,
        } => (project, error),
        other => panic!("unexpected outcome: {other:?}"),
    };

    assert!(matches!(error, SheriffError::MissingLastGreenCommit { .. }));
    assert_eq!(project.name, "rules_foo");
    assert!(project.downstream_result.tasks["ubuntu"].broken);
    assert!(project.downstream_result.tasks["macos"].flaky);
    assert_eq!(h.source.retried_jobs(DOWNSTREAM).len(), 2);
}

#[tokio::test]
async fn missing_main_build_leaves_no_project_behind() {
    let bisector = Arc::new(ScriptedBisector::new());
    let h = harness(ScriptedBuildSource::new(), bisector, Some(last_green()));

    let outcome = h.analyzer(&[("ubuntu", TaskState::Failed)], sha(4)).run_to_outcome().await;

    let (project, error) = outcome.into_parts();
    assert!(project.is_none());
    assert!(matches!(error, Some(SheriffError::NoFinishedBuild { .. })));
}
