//! CulpritClassifier: interprets the log of one bisection run.
//!
//! Checks run in a fixed order and the first match wins: culprit marker,
//! then the good-commit-regressed marker, then the no-repro marker. Each
//! check searches from the end of the log so the latest occurrence governs.

use serde::{Deserialize, Serialize};

use crate::domain::CommitId;

/// Printed by the bisection runner when it localizes a culprit.
pub const CULPRIT_MARKER: &str = "first bad commit is ";
/// Prefix of the line printed when the known-good endpoint fails its probe.
pub const GOOD_COMMIT_REGRESSED_MARKER: &str = "Given good commit";
/// Printed when no commit in the range reproduced the failure.
pub const NOT_REPRODUCED_MARKER: &str = "first bad commit not found, every commit succeeded.";

/// Which of the four recognized outcomes a log produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BisectVerdict {
    CulpritFound,
    GoodCommitRegressed,
    NotReproduced,
    Unknown,
}

/// Interpretation of one bisection log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BisectionOutcome {
    pub verdict: BisectVerdict,
    pub message: String,
    pub culprit: Option<CommitId>,
}

impl BisectionOutcome {
    /// The baseline itself failed; blame infrastructure, not code.
    pub fn is_infra_signal(&self) -> bool {
        self.verdict == BisectVerdict::GoodCommitRegressed
    }
}

/// Stateless classifier over bisection logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct CulpritClassifier;

impl CulpritClassifier {
    /// Classify `log`; `log_url` is quoted in every message for follow-up.
    pub fn classify(log: &str, log_url: &str) -> BisectionOutcome {
        if let Some((pos, culprit)) = find_culprit(log) {
            return BisectionOutcome {
                verdict: BisectVerdict::CulpritFound,
                message: [
                    "Culprit found!".to_string(),
                    log[pos..].replace('\r', ""),
                    format!("Bisect URL: {log_url}"),
                ]
                .join("\n"),
                culprit: Some(culprit),
            };
        }

        if log.rfind(GOOD_COMMIT_REGRESSED_MARKER).is_some() {
            return BisectionOutcome {
                verdict: BisectVerdict::GoodCommitRegressed,
                message: [
                    "Given good commit is now failing. This is probably caused by remote cache issue or infra change.".to_string(),
                    "Please ask the CI maintainers to investigate.".to_string(),
                    format!("Bisect URL: {log_url}"),
                ]
                .join("\n"),
                culprit: None,
            };
        }

        if log.rfind(NOT_REPRODUCED_MARKER).is_some() {
            return BisectionOutcome {
                verdict: BisectVerdict::NotReproduced,
                message: [
                    "Bisect didn't manage to reproduce the failure, all builds succeeded.".to_string(),
                    "Maybe the builds are cached from a previous build with a different Bazel version or it could be flaky.".to_string(),
                    "Please try to rerun the bisect with NEEDS_CLEAN=1 and REPEAT_TIMES=3.".to_string(),
                    format!("Bisect URL: {log_url}"),
                ]
                .join("\n"),
                culprit: None,
            };
        }

        BisectionOutcome {
            verdict: BisectVerdict::Unknown,
            message: format!("Bisect failed due to unknown reason, please check {log_url}"),
            culprit: None,
        }
    }
}

/// Last culprit marker followed by a full commit hash.
fn find_culprit(log: &str) -> Option<(usize, CommitId)> {
    let pos = log.rfind(CULPRIT_MARKER)?;
    let start = pos + CULPRIT_MARKER.len();
    let candidate = CommitId::new(log.get(start..start + CommitId::FULL_LEN)?);
    candidate.is_full_sha().then_some((pos, candidate))
}
