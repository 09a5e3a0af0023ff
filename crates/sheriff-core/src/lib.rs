//! Sheriff Core Library
//!
//! Failure triage for the toolchain's downstream pipeline: normalizes build
//! records, tells flakes from project regressions and toolchain regressions,
//! and localizes toolchain culprits by bisection.

pub mod analyzer;
pub mod bisect;
pub mod config;
pub mod culprit;
pub mod domain;
pub mod extract;
pub mod fakes;
pub mod metrics;
pub mod report;
pub mod retry;
pub mod source;
pub mod telemetry;
pub mod transcript;
pub mod triage;

pub use analyzer::{BuildInfoAnalyzer, ProjectOutcome, TriageContext};

pub use bisect::{
    BisectRequest, BisectScope, BisectionEngine, BisectionReport, Bisector, CommitHistory,
    FirstBadCommit, GitHistory, LocalBisector, PipelineProbe, Probe, RemoteBisector,
};

pub use config::{BisectSettings, LastGreenSettings, PipelineSettings, SheriffConfig};

pub use culprit::{BisectVerdict, BisectionOutcome, CulpritClassifier};

pub use domain::{
    BuildResult, BuildState, CommitId, Project, ProjectConfig, SheriffError, SheriffResult,
    TaskResult, TaskState,
};

pub use report::{AnalysisFailure, DownstreamBreakage, TaskRef, TriageReport};

pub use retry::{retry_failed_tasks, RetriedTask, RetryOutcome};

pub use source::{
    BuildFilter, BuildRecord, BuildRecordSource, JobRecord, LastGreenCommitSource,
    TracingObserver, TriggerRequest, WaitObserver,
};

pub use transcript::{
    AnnotationBlock, AnnotationStyle, ProgressSink, SuccessLog, Tone, TracingSink, Transcript,
};

pub use telemetry::init_tracing;

pub use triage::Sheriff;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
