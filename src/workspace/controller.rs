//! Git operations around an iteration.
//!
//! The controller owns every repository mutation: pre-work branch and
//! checkpoint creation, and post-work commit, merge, retain, or rollback.
//! All operations shell out to the git CLI and surface stderr in structured
//! errors.
//!
//! # Rollback safety
//!
//! Rollback is two-phase. Phase one resolves the checkpoint target and
//! writes a `rollback-pending` marker; phase two performs the ref swaps and
//! clears the marker. A crash mid-rollback leaves the marker in place, and
//! the loop refuses to start new iterations until [`resume_rollback`]
//! finishes the swap — a half-restored tree is never treated as success.
//!
//! [`resume_rollback`]: WorkspaceController::resume_rollback

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use super::BranchCheckpoint;
use crate::error::{EvolveError, Result};
use crate::mode::IterationMode;

/// Marker file written during a rollback, under the state directory.
const ROLLBACK_MARKER: &str = "rollback-pending.json";

// ============================================================================
// Reports
// ============================================================================

/// Result of merging an iteration branch.
#[derive(Debug, Clone)]
pub struct MergeReport {
    /// Merge commit on the base branch.
    pub merged_commit: String,

    /// Completion tag name.
    pub completion_tag: String,

    /// Files changed by the iteration.
    pub changed_files: Vec<String>,
}

/// Result of a completed rollback.
#[derive(Debug, Clone)]
pub struct RollbackReport {
    /// Name the iteration branch was renamed to.
    pub failed_branch: String,

    /// Hash the base branch was restored to.
    pub restored_hash: String,

    /// Hash of the discarded attempt, for the audit trail.
    pub previous_hash: String,
}

impl RollbackReport {
    /// Format a summary for display.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Rolled back {} -> {} (attempt preserved on {})",
            &self.previous_hash[..8.min(self.previous_hash.len())],
            &self.restored_hash[..8.min(self.restored_hash.len())],
            self.failed_branch
        )
    }
}

/// Persisted phase-one record of an in-progress rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPending {
    pub iteration: u64,
    pub branch: String,
    pub failed_branch: String,
    pub base_branch: String,
    pub target_tag: String,
    pub target_hash: String,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// Workspace Controller
// ============================================================================

/// Drives the per-iteration git state machine.
pub struct WorkspaceController {
    /// Project root (must be a git repository).
    project_dir: PathBuf,

    /// Directory for the rollback marker.
    state_dir: PathBuf,
}

impl WorkspaceController {
    /// Create a controller for the given project.
    #[must_use]
    pub fn new(project_dir: impl AsRef<Path>, state_dir: impl AsRef<Path>) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    // ------------------------------------------------------------------------
    // Pre-work
    // ------------------------------------------------------------------------

    /// Ensure no pending work can be lost: auto-commit any uncommitted
    /// changes on the current branch.
    ///
    /// Returns `true` when a snapshot commit was created.
    pub fn prepare(&self) -> Result<bool> {
        if !self.has_uncommitted_changes()? {
            return Ok(false);
        }

        info!("Auto-committing pending changes before branching");
        self.commit_all("chore: pre-iteration snapshot of pending work")
    }

    /// Create the iteration branch and checkpoint tag.
    ///
    /// The tag marks the pre-branch commit on the base branch and is the
    /// rollback target for this iteration.
    pub fn begin_iteration(
        &self,
        iteration: u64,
        mode: IterationMode,
    ) -> Result<BranchCheckpoint> {
        self.prepare()?;

        let base_branch = self.current_branch()?;
        let commit = self.head_hash()?;
        let branch = format!("evolve/iter-{iteration:04}-{mode}");
        let tag = format!("evolve-checkpoint-{iteration:04}");

        self.git(&["tag", &tag])?;
        self.git(&["checkout", "-b", &branch])?;

        info!("Began iteration {iteration} on {branch} (checkpoint {tag})");

        Ok(BranchCheckpoint {
            iteration,
            branch,
            tag,
            commit,
            base_branch,
            created_at: Utc::now(),
        })
    }

    // ------------------------------------------------------------------------
    // Post-work
    // ------------------------------------------------------------------------

    /// Commit the attempt and merge the iteration branch into the base
    /// branch with a merge commit, then tag completion and delete the
    /// branch.
    pub fn merge_iteration(
        &self,
        checkpoint: &BranchCheckpoint,
        commit_message: &str,
    ) -> Result<MergeReport> {
        self.commit_all(commit_message)?;

        let changed_files = self.changed_files(checkpoint)?;

        self.git(&["checkout", &checkpoint.base_branch])?;
        self.git(&[
            "merge",
            "--no-ff",
            "-m",
            &format!(
                "Merge {} (iteration {})",
                checkpoint.branch, checkpoint.iteration
            ),
            &checkpoint.branch,
        ])?;

        let completion_tag = format!("evolve-complete-{:04}", checkpoint.iteration);
        self.git(&["tag", &completion_tag])?;
        self.git(&["branch", "-D", &checkpoint.branch])?;

        let merged_commit = self.head_hash()?;
        info!(
            "Merged iteration {} into {} ({} files)",
            checkpoint.iteration,
            checkpoint.base_branch,
            changed_files.len()
        );

        Ok(MergeReport {
            merged_commit,
            completion_tag,
            changed_files,
        })
    }

    /// Commit the attempt on the iteration branch and leave the branch
    /// unmerged, returning to the base branch.
    ///
    /// Used for FAILED outcomes that did not breach the severe threshold.
    pub fn retain_failed(
        &self,
        checkpoint: &BranchCheckpoint,
        commit_message: &str,
    ) -> Result<()> {
        self.commit_all(commit_message)?;
        self.git(&["checkout", &checkpoint.base_branch])?;

        info!(
            "Retained failed attempt on {} (not merged)",
            checkpoint.branch
        );
        Ok(())
    }

    /// Roll the repository back to the iteration's checkpoint.
    ///
    /// The attempt is committed and preserved on `failed-<branch>`; the base
    /// branch is restored to the checkpoint commit.
    pub fn rollback(
        &self,
        checkpoint: &BranchCheckpoint,
        commit_message: &str,
    ) -> Result<RollbackReport> {
        // Phase one: resolve the target and persist the marker.
        let target_hash = self.git(&[
            "rev-parse",
            &format!("{}^{{commit}}", checkpoint.tag),
        ])?;

        let pending = RollbackPending {
            iteration: checkpoint.iteration,
            branch: checkpoint.branch.clone(),
            failed_branch: checkpoint.failed_branch_name(),
            base_branch: checkpoint.base_branch.clone(),
            target_tag: checkpoint.tag.clone(),
            target_hash: target_hash.clone(),
            started_at: Utc::now(),
        };
        self.write_rollback_marker(&pending)?;

        // Preserve the attempt before any ref swap.
        self.commit_all(commit_message)?;
        let previous_hash = self.head_hash()?;

        self.execute_rollback(&pending, previous_hash)
    }

    /// Finish a rollback whose marker was left behind by a crash.
    ///
    /// Idempotent: already-renamed branches and an already-restored base are
    /// accepted.
    pub fn resume_rollback(&self) -> Result<RollbackReport> {
        let pending = self.pending_rollback()?.ok_or(EvolveError::NotInFlight {
            detail: "no rollback is pending".to_string(),
        })?;

        info!(
            "Resuming rollback for iteration {} (target {})",
            pending.iteration, pending.target_hash
        );

        let previous_hash = self.head_hash()?;
        self.execute_rollback(&pending, previous_hash)
    }

    /// Phase two: rename the branch, restore the base, clear the marker.
    fn execute_rollback(
        &self,
        pending: &RollbackPending,
        previous_hash: String,
    ) -> Result<RollbackReport> {
        if self.ref_exists(&format!("refs/heads/{}", pending.branch))? {
            self.git(&["branch", "-m", &pending.branch, &pending.failed_branch])?;
        } else if !self.ref_exists(&format!("refs/heads/{}", pending.failed_branch))? {
            warn!(
                "Iteration branch {} vanished before rename; continuing restore",
                pending.branch
            );
        }

        self.git(&["checkout", &pending.base_branch])?;
        self.git(&["reset", "--hard", &pending.target_hash])?;

        let restored = self.head_hash()?;
        if restored != pending.target_hash {
            // Marker stays in place; the iteration is explicitly incomplete.
            return Err(EvolveError::Incomplete {
                iteration: pending.iteration,
                detail: format!(
                    "base branch is at {restored}, expected {}",
                    pending.target_hash
                ),
            });
        }

        self.clear_rollback_marker()?;

        let report = RollbackReport {
            failed_branch: pending.failed_branch.clone(),
            restored_hash: restored,
            previous_hash,
        };
        info!("Rollback complete: {}", report.summary());
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Rollback marker
    // ------------------------------------------------------------------------

    /// Read the pending-rollback marker, if one exists.
    pub fn pending_rollback(&self) -> Result<Option<RollbackPending>> {
        let path = self.rollback_marker_path();
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)?;
        let pending = serde_json::from_str(&contents)?;
        Ok(Some(pending))
    }

    fn rollback_marker_path(&self) -> PathBuf {
        self.state_dir.join(ROLLBACK_MARKER)
    }

    fn write_rollback_marker(&self, pending: &RollbackPending) -> Result<()> {
        fs::create_dir_all(&self.state_dir)?;

        // the marker must stay untracked so branch swaps cannot touch it
        let gitignore = self.state_dir.join(".gitignore");
        if !gitignore.exists() {
            fs::write(&gitignore, "*\n")?;
        }

        let path = self.rollback_marker_path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(pending)?)?;
        fs::rename(&tmp, &path)?;

        debug!("Wrote rollback marker for iteration {}", pending.iteration);
        Ok(())
    }

    fn clear_rollback_marker(&self) -> Result<()> {
        let path = self.rollback_marker_path();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Git queries
    // ------------------------------------------------------------------------

    /// Current branch name.
    pub fn current_branch(&self) -> Result<String> {
        self.git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// Current HEAD commit hash.
    pub fn head_hash(&self) -> Result<String> {
        self.git(&["rev-parse", "HEAD"])
    }

    /// Whether the working tree has uncommitted changes.
    pub fn has_uncommitted_changes(&self) -> Result<bool> {
        let status = self.git(&["status", "--porcelain"])?;
        Ok(!status.trim().is_empty())
    }

    /// Paths with uncommitted changes (staged, unstaged, or untracked).
    pub fn uncommitted_files(&self) -> Result<Vec<String>> {
        let status = self.git(&["status", "--porcelain"])?;
        Ok(status
            .lines()
            .filter_map(|line| line.get(3..))
            .map(|path| path.trim().trim_matches('"').to_string())
            .filter(|path| !path.is_empty())
            .collect())
    }

    /// Files changed since the checkpoint, as committed on the branch.
    pub fn changed_files(&self, checkpoint: &BranchCheckpoint) -> Result<Vec<String>> {
        let output = self.git(&["diff", "--name-only", &checkpoint.tag, "HEAD"])?;
        Ok(output
            .lines()
            .map(str::to_string)
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Whether the current HEAD tree is byte-for-byte the checkpoint tree.
    pub fn tree_matches_checkpoint(&self, checkpoint: &BranchCheckpoint) -> Result<bool> {
        let checkpoint_tree = self.git(&[
            "rev-parse",
            &format!("{}^{{tree}}", checkpoint.tag),
        ])?;
        let head_tree = self.git(&["rev-parse", "HEAD^{tree}"])?;
        Ok(checkpoint_tree == head_tree)
    }

    /// Stage everything and commit. Returns `false` when there was nothing
    /// to commit.
    pub fn commit_all(&self, message: &str) -> Result<bool> {
        self.git(&["add", "-A"])?;

        if self.git(&["status", "--porcelain"])?.trim().is_empty() {
            debug!("Nothing to commit");
            return Ok(false);
        }

        self.git(&["commit", "-m", message])?;
        Ok(true)
    }

    fn ref_exists(&self, reference: &str) -> Result<bool> {
        let output = Command::new("git")
            .args(["rev-parse", "--verify", "--quiet", reference])
            .current_dir(&self.project_dir)
            .output()
            .map_err(|e| EvolveError::git("rev-parse", e.to_string()))?;
        Ok(output.status.success())
    }

    /// Run a git command, returning trimmed stdout.
    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.project_dir)
            .output()
            .map_err(|e| EvolveError::git(args.first().copied().unwrap_or("git"), e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EvolveError::git(
                args.first().copied().unwrap_or("git"),
                stderr.trim(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
