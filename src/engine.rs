//! The evolution loop engine.
//!
//! One iteration is a transaction with a single external suspension point:
//!
//! 1. `begin` — measure, score, select mode and focus, persist the in-flight
//!    state, branch and checkpoint, write the actor briefing.
//! 2. the external actor edits the working tree.
//! 3. `complete` — re-measure, decide the outcome, archive to the ledger,
//!    then merge, retain, or roll back.
//!
//! The engine is strictly sequential within an iteration and refuses to
//! start while another iteration is in flight or a rollback is pending.

use chrono::Utc;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::actor::{Actor, BRIEFING_FILE};
use crate::config::{EvolveConfig, verify_git_environment};
use crate::error::{EvolveError, Result};
use crate::failure::{FailurePriority, FailureRecorder};
use crate::focus::{select_focus, FocusArea};
use crate::health::{health_score, SubScores};
use crate::ledger::{Baseline, IterationRecord, RollbackRecord, RunLedger};
use crate::metrics::{CollectorConfig, MetricsCollector, MetricsDelta, MetricsSnapshot};
use crate::mode::{select_mode, IterationMode, ModeInputs};
use crate::state::{IterationState, StateStore};
use crate::workspace::{
    controller::RollbackPending, determine_outcome, IterationOutcome, WorkspaceController,
    WorkspacePhase,
};

/// How many recent failed iterations contribute trouble-file hints.
const TROUBLE_ITERATIONS: usize = 3;

/// Cap on trouble-file hints in the briefing.
const TROUBLE_FILES_LIMIT: usize = 10;

// ============================================================================
// Reports
// ============================================================================

/// Per-iteration result, suitable for terminal display and exit signaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationReport {
    pub iteration: u64,
    pub mode: IterationMode,
    pub focus: FocusArea,
    pub health: u8,
    pub outcome: IterationOutcome,
    pub severe_regression: bool,
    pub merged: bool,
    pub rolled_back: bool,
    pub before: MetricsSnapshot,
    pub after: MetricsSnapshot,
    pub delta: MetricsDelta,
    pub reasons: Vec<String>,
    pub changed_files: Vec<String>,
    pub duration_secs: u64,
}

impl IterationReport {
    /// Render the human-readable before/after report.
    #[must_use]
    pub fn render(&self) -> String {
        let outcome = match self.outcome {
            IterationOutcome::Success => self.outcome.to_string().green().bold(),
            IterationOutcome::Partial => self.outcome.to_string().yellow().bold(),
            IterationOutcome::Failed => self.outcome.to_string().red().bold(),
        };

        let disposition = if self.rolled_back {
            "rolled back to checkpoint".red().to_string()
        } else if self.merged {
            "merged".green().to_string()
        } else {
            "retained on iteration branch, not merged".yellow().to_string()
        };

        let mut out = format!(
            "Iteration {} [{}/{}] {} ({})\n",
            self.iteration, self.mode, self.focus, outcome, disposition
        );
        out.push_str(&format!("  health: {}/100\n", self.health));
        out.push_str(&format!("  before: {}\n", self.before.summary()));
        out.push_str(&format!("  after:  {}\n", self.after.summary()));
        out.push_str(&format!("  delta:  {}\n", self.delta.summary()));

        for reason in &self.reasons {
            out.push_str(&format!("  - {reason}\n"));
        }

        if !self.changed_files.is_empty() {
            out.push_str(&format!("  files:  {}\n", self.changed_files.join(", ")));
        }

        out
    }
}

/// Snapshot of the loop's persistent state, for `evolve status`.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub in_flight: Option<IterationState>,
    pub rollback_pending: Option<RollbackPending>,
    pub next_iteration: u64,
    pub last_result: Option<IterationOutcome>,
    pub baseline: Baseline,
}

// ============================================================================
// Engine
// ============================================================================

/// Owns every component of the loop and drives the iteration protocol.
pub struct EvolutionEngine {
    project_dir: PathBuf,
    state_dir: PathBuf,
    config: EvolveConfig,
    collector: MetricsCollector,
    ledger: RunLedger,
    failures: FailureRecorder,
    workspace: WorkspaceController,
    state_store: StateStore,
}

impl EvolutionEngine {
    /// Build an engine for the project, verifying the git environment and
    /// compiling the probe configuration.
    pub fn new(project_dir: impl AsRef<Path>, config: EvolveConfig) -> Result<Self> {
        let project_dir = project_dir.as_ref().to_path_buf();
        verify_git_environment(&project_dir)?;

        let state_dir = EvolveConfig::state_dir(&project_dir);
        std::fs::create_dir_all(&state_dir)?;

        // the loop's own state must never be swept into iteration commits
        let gitignore = state_dir.join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(&gitignore, "*\n")?;
        }

        let collector = MetricsCollector::new(
            &project_dir,
            &CollectorConfig {
                commands: config.commands.clone(),
                scan: config.scan.clone(),
                command_timeout: config.command_timeout(),
            },
        )?;

        Ok(Self {
            collector,
            ledger: RunLedger::open(&state_dir)?,
            failures: FailureRecorder::open(&state_dir)?,
            workspace: WorkspaceController::new(&project_dir, &state_dir),
            state_store: StateStore::new(&state_dir),
            project_dir,
            state_dir,
            config,
        })
    }

    /// Path of the briefing written for the external actor.
    #[must_use]
    pub fn briefing_path(&self) -> PathBuf {
        self.state_dir.join(BRIEFING_FILE)
    }

    /// The failure recorder, for CLI listing and resolution.
    #[must_use]
    pub fn failures(&self) -> &FailureRecorder {
        &self.failures
    }

    /// The run ledger, for CLI history rendering.
    #[must_use]
    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    // ------------------------------------------------------------------------
    // Begin
    // ------------------------------------------------------------------------

    /// Start an iteration: measure, decide, branch, and suspend.
    ///
    /// The in-flight state is persisted before any working-tree mutation, so
    /// a crash at any later point is recoverable from disk.
    ///
    /// # Errors
    ///
    /// Refuses with [`EvolveError::RollbackPending`] or
    /// [`EvolveError::Busy`] without creating any state.
    pub async fn begin(&self) -> Result<IterationState> {
        if let Some(pending) = self.workspace.pending_rollback()? {
            return Err(EvolveError::RollbackPending {
                iteration: pending.iteration,
            });
        }

        if self.state_store.exists() {
            let iteration = self
                .state_store
                .load()
                .ok()
                .flatten()
                .map_or(0, |s| s.iteration);
            return Err(EvolveError::Busy {
                iteration,
                state_file: self.state_store.state_file_path(),
            });
        }

        let iteration = self.ledger.next_iteration()?;
        info!("Beginning iteration {iteration}");

        let before = self.collector.collect().await;
        let sub_scores = SubScores::derive(&before, &self.config.assessments);
        let health = health_score(&sub_scores, &self.config.weights);

        let baseline = self.ledger.baseline()?;
        let inputs = ModeInputs {
            health,
            iteration,
            critical_findings: before.security_counts().critical,
            critical_failure_count: self.failures.high_priority_open_count()?,
            test_quality: sub_scores.test,
            quality: self.config.assessments.quality,
            ux: self.config.assessments.ux,
            logging: self.config.assessments.logging,
            debt: sub_scores.debt,
            performance_regressed: baseline
                .performance_regressed(self.config.assessments.performance),
            structural_debt: self.failures.escalation()?,
        };
        let mode = select_mode(&inputs);
        let focus = select_focus(&before, &self.ledger.recent_focus(3)?);

        info!(
            "Iteration {iteration}: health {health}, mode {} ({}), focus {}",
            mode.mode, mode.rule, focus.area
        );

        let mut state = IterationState {
            iteration,
            mode: mode.mode,
            mode_rule: mode.rule.to_string(),
            focus: focus.area,
            focus_trigger: focus.trigger.map(str::to_string),
            health,
            sub_scores,
            before,
            checkpoint: None,
            phase: WorkspacePhase::Clean,
            started_at: Utc::now(),
        };

        // The iteration number is on disk before the tree is touched.
        self.state_store.save(&state)?;

        let checkpoint = self.workspace.begin_iteration(iteration, state.mode)?;
        state.checkpoint = Some(checkpoint);
        state.phase = WorkspacePhase::Branched;
        self.state_store.save(&state)?;

        let briefing = state.render_briefing(
            &self.failures.open_records()?,
            &self.trouble_files()?,
        );
        std::fs::write(self.briefing_path(), briefing)?;

        state.phase = WorkspacePhase::Changed;
        self.state_store.save(&state)?;

        Ok(state)
    }

    // ------------------------------------------------------------------------
    // Complete
    // ------------------------------------------------------------------------

    /// Finish the in-flight iteration: re-measure, decide, archive, and
    /// merge or roll back.
    pub async fn complete(&self) -> Result<IterationReport> {
        let mut state = self.state_store.load()?.ok_or(EvolveError::NotInFlight {
            detail: "run `evolve begin` first".to_string(),
        })?;

        let checkpoint = state.checkpoint.clone().ok_or(EvolveError::Incomplete {
            iteration: state.iteration,
            detail: "state has no checkpoint; the branch step never finished".to_string(),
        })?;

        let after = self.collector.collect().await;
        let decision = determine_outcome(&state.before, &after, &self.config.regression);
        let delta = state.before.delta(&after);

        // changed-file list for the structured commit message, gathered
        // before anything is committed
        let mut changed_files = self.workspace.changed_files(&checkpoint)?;
        for file in self.workspace.uncommitted_files()? {
            if !changed_files.contains(&file) {
                changed_files.push(file);
            }
        }

        state.phase = WorkspacePhase::Evaluated;
        self.state_store.save(&state)?;

        let finished_at = Utc::now();
        let duration_secs = (finished_at - state.started_at).num_seconds().max(0) as u64;
        let commit_message =
            build_commit_message(&state, &after, &decision.outcome, &delta, &changed_files);

        let record = IterationRecord {
            iteration: state.iteration,
            mode: state.mode,
            mode_rule: state.mode_rule.clone(),
            focus: state.focus,
            focus_trigger: state.focus_trigger.clone(),
            health: state.health,
            before: state.before.clone(),
            after: after.clone(),
            delta,
            outcome: decision.outcome,
            severe_regression: decision.severe_regression,
            reasons: decision.reasons.clone(),
            changed_files: changed_files.clone(),
            started_at: state.started_at,
            finished_at,
            duration_secs,
        };
        self.ledger
            .record_iteration(record, self.config.assessments.performance)?;

        let (merged, rolled_back) = match decision.outcome {
            IterationOutcome::Success | IterationOutcome::Partial => {
                self.workspace.merge_iteration(&checkpoint, &commit_message)?;
                (true, false)
            }
            IterationOutcome::Failed if decision.severe_regression => {
                let report = self.workspace.rollback(&checkpoint, &commit_message)?;
                self.ledger.record_rollback(RollbackRecord {
                    iteration: state.iteration,
                    failed_branch: report.failed_branch,
                    restored_hash: report.restored_hash,
                    previous_hash: report.previous_hash,
                    recorded_at: Utc::now(),
                })?;
                (false, true)
            }
            IterationOutcome::Failed => {
                self.workspace.retain_failed(&checkpoint, &commit_message)?;
                (false, false)
            }
        };

        if decision.outcome == IterationOutcome::Failed {
            let description = if decision.reasons.is_empty() {
                format!("iteration {} failed", state.iteration)
            } else {
                decision.reasons.join("; ")
            };
            self.failures.record_blocked(
                description,
                FailurePriority::High,
                Vec::new(),
                state.iteration,
            )?;
        }

        self.state_store.clear()?;

        let report = IterationReport {
            iteration: state.iteration,
            mode: state.mode,
            focus: state.focus,
            health: state.health,
            outcome: decision.outcome,
            severe_regression: decision.severe_regression,
            merged,
            rolled_back,
            before: state.before,
            after,
            delta,
            reasons: decision.reasons,
            changed_files,
            duration_secs,
        };

        info!(
            "Iteration {} finished: {} ({})",
            report.iteration,
            report.outcome,
            report.delta.summary()
        );
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Full iterations
    // ------------------------------------------------------------------------

    /// Run one full iteration with the given actor at the suspension point.
    pub async fn run_iteration(&self, actor: &dyn Actor) -> Result<IterationReport> {
        let state = self.begin().await?;
        info!(
            "Suspending iteration {} for actor ({})",
            state.iteration,
            actor.describe()
        );

        if let Err(e) = actor.perform(&self.project_dir, &self.briefing_path()).await {
            // a blocked actor is signal, not an abort; re-measurement decides
            warn!("Actor did not complete cleanly: {e}");
        }

        self.complete().await
    }

    /// Run up to `iterations` full iterations, collecting their reports.
    pub async fn run(&self, actor: &dyn Actor, iterations: u32) -> Result<Vec<IterationReport>> {
        let mut reports = Vec::new();
        for _ in 0..iterations {
            reports.push(self.run_iteration(actor).await?);
        }
        Ok(reports)
    }

    // ------------------------------------------------------------------------
    // Recovery and introspection
    // ------------------------------------------------------------------------

    /// Finish a rollback interrupted by a crash, then clear the in-flight
    /// state.
    pub async fn resume_rollback(&self) -> Result<IterationReport> {
        let pending = self.workspace.pending_rollback()?.ok_or(EvolveError::NotInFlight {
            detail: "no rollback is pending".to_string(),
        })?;

        let report = self.workspace.resume_rollback()?;
        self.ledger.record_rollback(RollbackRecord {
            iteration: pending.iteration,
            failed_branch: report.failed_branch.clone(),
            restored_hash: report.restored_hash.clone(),
            previous_hash: report.previous_hash.clone(),
            recorded_at: Utc::now(),
        })?;

        let state = self.state_store.load().unwrap_or(None);
        self.state_store.clear()?;

        let before = state.as_ref().map(|s| s.before.clone()).unwrap_or_default();
        Ok(IterationReport {
            iteration: pending.iteration,
            mode: state.as_ref().map_or(IterationMode::Standard, |s| s.mode),
            focus: state.as_ref().map_or(FocusArea::Frontend, |s| s.focus),
            health: state.as_ref().map_or(0, |s| s.health),
            outcome: IterationOutcome::Failed,
            severe_regression: true,
            merged: false,
            rolled_back: true,
            after: before.clone(),
            before,
            delta: MetricsDelta::default(),
            reasons: vec!["rollback resumed after interruption".to_string()],
            changed_files: Vec::new(),
            duration_secs: 0,
        })
    }

    /// Current persistent status of the loop.
    pub fn status(&self) -> Result<EngineStatus> {
        let in_flight = match self.state_store.load() {
            Ok(state) => state,
            Err(_) => None,
        };

        Ok(EngineStatus {
            in_flight,
            rollback_pending: self.workspace.pending_rollback()?,
            next_iteration: self.ledger.next_iteration()?,
            last_result: self.ledger.last_result()?,
            baseline: self.ledger.baseline()?,
        })
    }

    /// Files changed by recent failed iterations, as hints for the actor.
    fn trouble_files(&self) -> Result<Vec<String>> {
        let iterations = self.ledger.iterations()?;
        let mut files = Vec::new();

        for record in iterations
            .iter()
            .rev()
            .filter(|r| r.outcome == IterationOutcome::Failed)
            .take(TROUBLE_ITERATIONS)
        {
            for file in &record.changed_files {
                if !files.contains(file) {
                    files.push(file.clone());
                }
            }
        }

        files.truncate(TROUBLE_FILES_LIMIT);
        Ok(files)
    }
}

/// Structured commit message carrying mode, focus, metrics, deltas, and the
/// changed-file list.
fn build_commit_message(
    state: &IterationState,
    after: &MetricsSnapshot,
    outcome: &IterationOutcome,
    delta: &MetricsDelta,
    changed_files: &[String],
) -> String {
    let mut msg = format!(
        "evolve: iteration {} [{}/{}] {}\n\n",
        state.iteration, state.mode, state.focus, outcome
    );

    msg.push_str(&format!("Health: {}/100\n", state.health));
    msg.push_str(&format!("Before: {}\n", state.before.summary()));
    msg.push_str(&format!("After:  {}\n", after.summary()));
    msg.push_str(&format!("Delta:  {}\n", delta.summary()));

    if !changed_files.is_empty() {
        msg.push_str("\nFiles:\n");
        for file in changed_files {
            msg.push_str(&format!("- {file}\n"));
        }
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::RegressionPolicy;

    fn sample_state(iteration: u64) -> IterationState {
        IterationState {
            iteration,
            mode: IterationMode::Standard,
            mode_rule: "standard".to_string(),
            focus: FocusArea::Backend,
            focus_trigger: None,
            health: 77,
            sub_scores: SubScores::derive(
                &MetricsSnapshot::new().with_test_counts(10, 0),
                &Default::default(),
            ),
            before: MetricsSnapshot::new().with_test_counts(10, 0),
            checkpoint: None,
            phase: WorkspacePhase::Changed,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_commit_message_structure() {
        let state = sample_state(12);
        let after = MetricsSnapshot::new().with_test_counts(13, 0);
        let delta = state.before.delta(&after);

        let msg = build_commit_message(
            &state,
            &after,
            &IterationOutcome::Success,
            &delta,
            &["src/api.rs".to_string()],
        );

        assert!(msg.starts_with("evolve: iteration 12 [standard/backend] SUCCESS"));
        assert!(msg.contains("Before: 10/10 tests passing"));
        assert!(msg.contains("After:  13/13 tests passing"));
        assert!(msg.contains("Delta:  +3 tests"));
        assert!(msg.contains("- src/api.rs"));
    }

    #[test]
    fn test_report_render_mentions_disposition() {
        let state = sample_state(3);
        let after = MetricsSnapshot::new().with_test_counts(3, 7);
        let decision = determine_outcome(&state.before, &after, &RegressionPolicy::default());

        let report = IterationReport {
            iteration: 3,
            mode: state.mode,
            focus: state.focus,
            health: state.health,
            outcome: decision.outcome,
            severe_regression: decision.severe_regression,
            merged: false,
            rolled_back: true,
            delta: state.before.delta(&after),
            before: state.before,
            after,
            reasons: decision.reasons,
            changed_files: vec!["src/api.rs".to_string()],
            duration_secs: 30,
        };

        let rendered = report.render();
        assert!(rendered.contains("FAILED"));
        assert!(rendered.contains("rolled back to checkpoint"));
        assert!(rendered.contains("src/api.rs"));
    }
}
