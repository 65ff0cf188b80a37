//! In-flight iteration state.
//!
//! [`IterationState`] is constructed fresh at the start of every iteration
//! from the ledger's last entry plus freshly collected metrics; there is no
//! long-lived mutable global. The state file doubles as the busy marker: it
//! is written before any working-tree mutation and removed after the
//! iteration is archived to the ledger, so a second invocation can refuse
//! cleanly and a crash can be recovered from disk.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{EvolveError, Result};
use crate::failure::FailureRecord;
use crate::focus::FocusArea;
use crate::health::SubScores;
use crate::metrics::MetricsSnapshot;
use crate::mode::IterationMode;
use crate::workspace::{BranchCheckpoint, WorkspacePhase};

/// State file name under the state directory.
const STATE_FILE: &str = "iteration.json";

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = ".tmp";

/// Lock file suffix for concurrent access prevention.
const LOCK_SUFFIX: &str = ".lock";

// ============================================================================
// Iteration State
// ============================================================================

/// Everything known about the iteration currently in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationState {
    pub iteration: u64,
    pub mode: IterationMode,
    /// Selection rule that chose the mode.
    pub mode_rule: String,
    pub focus: FocusArea,
    pub focus_trigger: Option<String>,
    pub health: u8,
    pub sub_scores: SubScores,
    pub before: MetricsSnapshot,
    /// Set once the workspace is branched.
    pub checkpoint: Option<BranchCheckpoint>,
    pub phase: WorkspacePhase,
    pub started_at: DateTime<Utc>,
}

impl IterationState {
    /// Render the readable briefing exposed to the external actor at the
    /// suspension point.
    #[must_use]
    pub fn render_briefing(
        &self,
        failures: &[FailureRecord],
        trouble_files: &[String],
    ) -> String {
        let mut out = String::new();

        out.push_str(&format!("# Iteration {}\n\n", self.iteration));
        out.push_str(&format!("- Mode: {} (rule: {})\n", self.mode, self.mode_rule));
        out.push_str(&format!("- Focus: {}", self.focus));
        if let Some(trigger) = &self.focus_trigger {
            out.push_str(&format!(" (trigger: {trigger})"));
        }
        out.push('\n');
        out.push_str(&format!("- Health: {}/100\n", self.health));
        out.push_str(&format!("- Before: {}\n", self.before.summary()));

        out.push_str("\n## Effort split\n\n");
        for (activity, pct) in self.mode.effort_split() {
            out.push_str(&format!("- {activity}: {pct}%\n"));
        }

        if !failures.is_empty() {
            out.push_str("\n## Open failures\n\n");
            for record in failures {
                out.push_str(&format!(
                    "- [{}] {} (seen {}x, first iteration {})\n",
                    record.priority,
                    record.description,
                    record.occurrences,
                    record.first_seen_iteration
                ));
                for remedy in &record.attempted_remedies {
                    out.push_str(&format!("  - tried: {remedy}\n"));
                }
            }
        }

        if !trouble_files.is_empty() {
            out.push_str("\n## Trouble files\n\n");
            for file in trouble_files {
                out.push_str(&format!("- {file}\n"));
            }
        }

        out.push_str(
            "\nMake your changes in the working tree, then let the loop resume. \
             Do not commit, merge, or switch branches yourself.\n",
        );

        out
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Atomic file-based persistence for the in-flight state.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Create a store rooted at the state directory.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path to the state file.
    #[must_use]
    pub fn state_file_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn tmp_file_path(&self) -> PathBuf {
        self.dir.join(format!("{STATE_FILE}{TMP_SUFFIX}"))
    }

    fn lock_file_path(&self) -> PathBuf {
        self.dir.join(format!("{STATE_FILE}{LOCK_SUFFIX}"))
    }

    /// Save state atomically (write temp file, fsync, rename).
    pub fn save(&self, state: &IterationState) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let lock_file = File::create(self.lock_file_path())?;
        FileExt::lock_exclusive(&lock_file)
            .map_err(|e| EvolveError::ledger(format!("failed to acquire state lock: {e}")))?;

        let tmp_path = self.tmp_file_path();
        let json = serde_json::to_string_pretty(state)?;

        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(json.as_bytes())?;
        tmp_file.sync_all()?;

        fs::rename(&tmp_path, self.state_file_path())?;

        Ok(())
    }

    /// Load the in-flight state, if any.
    ///
    /// # Errors
    ///
    /// A corrupt state file is an [`EvolveError::Incomplete`]: the iteration
    /// it belonged to needs manual inspection, so it is never silently
    /// discarded.
    pub fn load(&self) -> Result<Option<IterationState>> {
        let path = self.state_file_path();
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)?;
        match serde_json::from_str(&contents) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!("Corrupt state file at {}: {}", path.display(), e);
                Err(EvolveError::Incomplete {
                    iteration: 0,
                    detail: format!(
                        "state file {} is unreadable ({e}); inspect and remove it to recover",
                        path.display()
                    ),
                })
            }
        }
    }

    /// Remove the state file after the iteration is archived.
    pub fn clear(&self) -> Result<()> {
        let path = self.state_file_path();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Whether an iteration is in flight.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.state_file_path().exists()
    }
}
