//! Culprit localization over toolchain history.

pub mod dispatch;
pub mod engine;
pub mod git;
pub mod probe;

pub use dispatch::{BisectScope, Bisector, LocalBisector, RemoteBisector, TASK_NAME_FLAG};
pub use engine::{
    BisectRequest, BisectionEngine, BisectionReport, CommitHistory, FirstBadCommit, Probe,
    ProbeRecord,
};
pub use git::GitHistory;
pub use probe::PipelineProbe;
