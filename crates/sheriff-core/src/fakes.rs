//! In-memory fakes for the triage traits (testing only).
//!
//! Every fake records the calls it receives so tests can assert on retries,
//! triggered builds and probes.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::bisect::{BisectScope, Bisector, CommitHistory, Probe};
use crate::culprit::BisectionOutcome;
use crate::domain::{CommitId, ProjectConfig, SheriffError, SheriffResult};
use crate::source::{
    BuildFilter, BuildRecord, BuildRecordSource, JobRecord, LastGreenCommitSource,
    TriggerRequest, WaitObserver,
};
use crate::transcript::{AnnotationBlock, ProgressSink};

// ---------------------------------------------------------------------------
// ScriptedBuildSource
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SourceState {
    /// Newest first, per pipeline.
    listed: HashMap<String, Vec<BuildRecord>>,
    /// Completed records handed out by successive triggers, per pipeline.
    scripted: HashMap<String, VecDeque<BuildRecord>>,
    /// Completed records of triggered builds, by (pipeline, number).
    finished: HashMap<(String, u64), BuildRecord>,
    retry_states: HashMap<(String, String), String>,
    retried: HashMap<(String, String), JobRecord>,
    logs: HashMap<String, String>,
    triggered: Vec<(String, TriggerRequest)>,
    retried_jobs: Vec<(String, String)>,
    list_calls: Vec<(String, BuildFilter)>,
    next_number: u64,
}

/// Build record source driven entirely by pre-registered records.
#[derive(Debug, Default)]
pub struct ScriptedBuildSource {
    state: Mutex<SourceState>,
}

impl ScriptedBuildSource {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SourceState {
                next_number: 1000,
                ..SourceState::default()
            }),
        }
    }

    /// Register a finished build; later registrations are newer.
    pub fn with_build(self, pipeline: &str, build: BuildRecord) -> Self {
        self.state
            .lock()
            .unwrap()
            .listed
            .entry(pipeline.to_string())
            .or_default()
            .insert(0, build);
        self
    }

    /// Queue the completed record returned for the next trigger on `pipeline`.
    pub fn with_triggered_build(self, pipeline: &str, build: BuildRecord) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(pipeline.to_string())
            .or_default()
            .push_back(build);
        self
    }

    /// Queue a job-less completed build in `state`.
    pub fn with_triggered_state(self, pipeline: &str, state: &str) -> Self {
        let build = BuildRecord {
            number: 0,
            commit: String::new(),
            state: state.to_string(),
            web_url: format!("https://ci/{pipeline}/triggered"),
            jobs: Vec::new(),
        };
        self.with_triggered_build(pipeline, build)
    }

    /// State the retry of `job_id` finishes in.
    pub fn with_retry_state(self, pipeline: &str, job_id: &str, state: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .retry_states
            .insert((pipeline.to_string(), job_id.to_string()), state.to_string());
        self
    }

    pub fn with_log(self, job_id: &str, log: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .logs
            .insert(job_id.to_string(), log.to_string());
        self
    }

    /// Trigger requests received for `pipeline`, in order.
    pub fn triggered(&self, pipeline: &str) -> Vec<TriggerRequest> {
        self.state
            .lock()
            .unwrap()
            .triggered
            .iter()
            .filter(|(p, _)| p == pipeline)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Original job ids retried on `pipeline`, in order.
    pub fn retried_jobs(&self, pipeline: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .retried_jobs
            .iter()
            .filter(|(p, _)| p == pipeline)
            .map(|(_, j)| j.clone())
            .collect()
    }

    pub fn total_retries(&self) -> usize {
        self.state.lock().unwrap().retried_jobs.len()
    }

    pub fn total_triggers(&self) -> usize {
        self.state.lock().unwrap().triggered.len()
    }

    pub fn list_calls(&self) -> Vec<(String, BuildFilter)> {
        self.state.lock().unwrap().list_calls.clone()
    }
}

#[async_trait]
impl BuildRecordSource for ScriptedBuildSource {
    async fn list_builds(
        &self,
        pipeline: &str,
        filter: &BuildFilter,
    ) -> SheriffResult<Vec<BuildRecord>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls.push((pipeline.to_string(), filter.clone()));
        let builds = state.listed.get(pipeline).cloned().unwrap_or_default();
        Ok(builds.into_iter().take(filter.per_page as usize).collect())
    }

    async fn get_build(&self, pipeline: &str, number: u64) -> SheriffResult<BuildRecord> {
        let state = self.state.lock().unwrap();
        state
            .finished
            .get(&(pipeline.to_string(), number))
            .cloned()
            .or_else(|| {
                state
                    .listed
                    .get(pipeline)
                    .and_then(|builds| builds.iter().find(|b| b.number == number).cloned())
            })
            .ok_or_else(|| SheriffError::Source(format!("no build {pipeline}#{number}")))
    }

    async fn trigger_build(
        &self,
        pipeline: &str,
        request: &TriggerRequest,
    ) -> SheriffResult<BuildRecord> {
        let mut state = self.state.lock().unwrap();
        state
            .triggered
            .push((pipeline.to_string(), request.clone()));
        let mut finished = state
            .scripted
            .get_mut(pipeline)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| SheriffError::Source(format!("no build scripted for {pipeline}")))?;
        state.next_number += 1;
        let number = state.next_number;
        finished.number = number;
        if finished.commit.is_empty() {
            finished.commit = request.commit.clone();
        }
        let scheduled = BuildRecord {
            number,
            commit: request.commit.clone(),
            state: "scheduled".to_string(),
            web_url: finished.web_url.clone(),
            jobs: Vec::new(),
        };
        state.finished.insert((pipeline.to_string(), number), finished);
        Ok(scheduled)
    }

    async fn wait_build(
        &self,
        pipeline: &str,
        number: u64,
        observer: &dyn WaitObserver,
    ) -> SheriffResult<BuildRecord> {
        observer
            .waiting(&format!("Waiting for build {pipeline}#{number} to finish"))
            .await;
        self.get_build(pipeline, number).await
    }

    async fn retry_job(
        &self,
        pipeline: &str,
        _number: u64,
        job_id: &str,
    ) -> SheriffResult<JobRecord> {
        let mut state = self.state.lock().unwrap();
        let key = (pipeline.to_string(), job_id.to_string());
        let final_state = state
            .retry_states
            .get(&key)
            .cloned()
            .ok_or_else(|| SheriffError::Source(format!("no retry scripted for {job_id}")))?;
        let retried_id = format!("{job_id}-retry");
        state.retried_jobs.push(key);
        state.retried.insert(
            (pipeline.to_string(), retried_id.clone()),
            JobRecord {
                id: Some(retried_id.clone()),
                name: Some(format!("{job_id} (retry)")),
                state: Some(final_state),
                web_url: Some(format!("https://ci/{pipeline}/{retried_id}")),
                command: None,
                raw_log_url: None,
            },
        );
        Ok(JobRecord {
            id: Some(retried_id),
            state: Some("scheduled".to_string()),
            ..JobRecord::default()
        })
    }

    async fn wait_job(
        &self,
        pipeline: &str,
        _number: u64,
        job_id: &str,
        observer: &dyn WaitObserver,
    ) -> SheriffResult<JobRecord> {
        observer
            .waiting(&format!("Waiting for job {job_id} to finish"))
            .await;
        let state = self.state.lock().unwrap();
        state
            .retried
            .get(&(pipeline.to_string(), job_id.to_string()))
            .cloned()
            .ok_or_else(|| SheriffError::Source(format!("unknown job {job_id}")))
    }

    async fn get_log(&self, _pipeline: &str, job: &JobRecord) -> SheriffResult<String> {
        let id = job.id.as_deref().unwrap_or_default();
        Ok(self
            .state
            .lock()
            .unwrap()
            .logs
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// StaticLastGreen
// ---------------------------------------------------------------------------

/// Fixed last-green commits keyed by project name.
#[derive(Debug, Default)]
pub struct StaticLastGreen {
    commits: HashMap<String, CommitId>,
}

impl StaticLastGreen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commit(mut self, project: &str, commit: CommitId) -> Self {
        self.commits.insert(project.to_string(), commit);
        self
    }
}

#[async_trait]
impl LastGreenCommitSource for StaticLastGreen {
    async fn last_green_commit(&self, project: &ProjectConfig) -> SheriffResult<Option<CommitId>> {
        Ok(self.commits.get(&project.name).cloned())
    }
}

// ---------------------------------------------------------------------------
// FakeHistory
// ---------------------------------------------------------------------------

/// History that returns one fixed range for any bounds.
#[derive(Debug, Default)]
pub struct FakeHistory {
    commits: Vec<CommitId>,
    fail_query: bool,
    fail_describe: bool,
    queries: Mutex<Vec<(CommitId, CommitId)>>,
}

impl FakeHistory {
    pub fn new(commits: Vec<CommitId>) -> Self {
        Self {
            commits,
            ..Self::default()
        }
    }

    pub fn failing_query(mut self) -> Self {
        self.fail_query = true;
        self
    }

    pub fn failing_describe(mut self) -> Self {
        self.fail_describe = true;
        self
    }

    pub fn queries(&self) -> Vec<(CommitId, CommitId)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommitHistory for FakeHistory {
    async fn commits_between(
        &self,
        good: &CommitId,
        bad: &CommitId,
    ) -> SheriffResult<Vec<CommitId>> {
        self.queries
            .lock()
            .unwrap()
            .push((good.clone(), bad.clone()));
        if self.fail_query {
            return Err(SheriffError::CommitQuery {
                good: good.clone(),
                bad: bad.clone(),
                detail: "unknown revision".to_string(),
            });
        }
        Ok(self.commits.clone())
    }

    async fn describe(&self, commit: &CommitId) -> SheriffResult<String> {
        if self.fail_describe {
            return Err(SheriffError::Source(format!("cannot describe {commit}")));
        }
        Ok(format!("commit {commit}\n\n    Change {}", commit.short()))
    }
}

// ---------------------------------------------------------------------------
// ScriptedProbe
// ---------------------------------------------------------------------------

/// Probe with per-commit verdicts; unlisted commits pass.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    results: HashMap<CommitId, bool>,
    calls: Mutex<Vec<CommitId>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commits of `range` from index `first_bad` on fail; the rest pass.
    pub fn first_bad_at(range: &[CommitId], first_bad: Option<usize>) -> Self {
        let results = range
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), first_bad.map_or(true, |bad| i < bad)))
            .collect();
        Self {
            results,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_result(mut self, commit: CommitId, passed: bool) -> Self {
        self.results.insert(commit, passed);
        self
    }

    /// Every probed commit, good-endpoint check included.
    pub fn calls(&self) -> Vec<CommitId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self, _project: &str, _task: &str, commit: &CommitId) -> SheriffResult<bool> {
        self.calls.lock().unwrap().push(commit.clone());
        Ok(self.results.get(commit).copied().unwrap_or(true))
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Progress sink that keeps every published block.
#[derive(Debug, Default)]
pub struct RecordingSink {
    blocks: Mutex<Vec<AnnotationBlock>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> Vec<AnnotationBlock> {
        self.blocks.lock().unwrap().clone()
    }

    /// Most recent block published under `context`.
    pub fn latest(&self, context: &str) -> Option<AnnotationBlock> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|b| b.context == context)
            .cloned()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn publish(&self, block: &AnnotationBlock) -> SheriffResult<()> {
        self.blocks.lock().unwrap().push(block.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedBisector
// ---------------------------------------------------------------------------

/// Bisector returning canned outcomes per task.
#[derive(Debug, Default)]
pub struct ScriptedBisector {
    outcomes: BTreeMap<String, BisectionOutcome>,
    calls: Mutex<Vec<BisectScope>>,
}

impl ScriptedBisector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, task: &str, outcome: BisectionOutcome) -> Self {
        self.outcomes.insert(task.to_string(), outcome);
        self
    }

    pub fn calls(&self) -> Vec<BisectScope> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Bisector for ScriptedBisector {
    async fn bisect(
        &self,
        scope: &BisectScope,
        _observer: &dyn WaitObserver,
    ) -> SheriffResult<BTreeMap<String, BisectionOutcome>> {
        self.calls.lock().unwrap().push(scope.clone());
        Ok(scope
            .tasks
            .iter()
            .filter_map(|t| self.outcomes.get(t).map(|o| (t.clone(), o.clone())))
            .collect())
    }
}
