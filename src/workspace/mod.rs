//! Workspace control: branch and checkpoint management around an iteration.
//!
//! Each iteration moves through the state machine
//! `CLEAN -> BRANCHED -> CHANGED -> EVALUATED -> {MERGED | ROLLED_BACK}`.
//! The [`controller::WorkspaceController`] is the only component that
//! mutates git state; everything it does is observable as branches, tags,
//! and commits.

pub mod controller;
pub mod outcome;

pub use controller::{MergeReport, RollbackReport, WorkspaceController};
pub use outcome::{determine_outcome, IterationOutcome, OutcomeDecision, RegressionPolicy};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of the per-iteration workspace state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkspacePhase {
    /// No iteration branch exists; the tree is clean.
    Clean,
    /// The iteration branch and checkpoint tag exist.
    Branched,
    /// The external actor is (or was) editing the tree.
    Changed,
    /// After-metrics are captured and the outcome is decided.
    Evaluated,
    /// The iteration branch was merged into the main line.
    Merged,
    /// The main line was restored to the checkpoint.
    RolledBack,
}

impl std::fmt::Display for WorkspacePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Clean => "clean",
            Self::Branched => "branched",
            Self::Changed => "changed",
            Self::Evaluated => "evaluated",
            Self::Merged => "merged",
            Self::RolledBack => "rolled-back",
        };
        write!(f, "{s}")
    }
}

/// A named iteration branch plus the immutable tag marking the
/// pre-iteration commit, used as the rollback target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCheckpoint {
    /// Iteration the checkpoint belongs to.
    pub iteration: u64,

    /// Iteration branch name, e.g. `evolve/iter-0007-security`.
    pub branch: String,

    /// Checkpoint tag name, e.g. `evolve-checkpoint-0007`.
    pub tag: String,

    /// Commit hash the tag points at.
    pub commit: String,

    /// Branch the iteration was started from and merges back into.
    pub base_branch: String,

    /// When the checkpoint was created.
    pub created_at: DateTime<Utc>,
}

impl BranchCheckpoint {
    /// Name the branch is given when a rollback discards it.
    #[must_use]
    pub fn failed_branch_name(&self) -> String {
        format!("failed-{}", self.branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(WorkspacePhase::Clean.to_string(), "clean");
        assert_eq!(WorkspacePhase::RolledBack.to_string(), "rolled-back");
    }

    #[test]
    fn test_failed_branch_name() {
        let checkpoint = BranchCheckpoint {
            iteration: 7,
            branch: "evolve/iter-0007-security".to_string(),
            tag: "evolve-checkpoint-0007".to_string(),
            commit: "abc123".to_string(),
            base_branch: "main".to_string(),
            created_at: Utc::now(),
        };

        assert_eq!(
            checkpoint.failed_branch_name(),
            "failed-evolve/iter-0007-security"
        );
    }
}
