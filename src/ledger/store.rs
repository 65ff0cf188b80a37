//! Append-only persistence for the run ledger.
//!
//! Three files live under the state directory:
//!
//! - `history.jsonl` — one tagged [`LedgerEntry`] per line, append-only.
//! - `baseline.json` — the best-ever record, rewritten only when a tracked
//!   field strictly improves.
//! - `patterns.jsonl` — the successful-fix pattern log, append-only.
//!
//! Appends take an exclusive advisory lock on the history file; reads
//! tolerate corrupt lines (logged and skipped) so one bad write can never
//! wedge the loop.

use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{
    AnalysisRecord, Baseline, FocusStats, IterationRecord, LedgerEntry, PatternEntry,
    RecurringFailure, RollbackRecord,
};
use crate::error::{EvolveError, Result};
use crate::focus::FocusArea;
use crate::workspace::IterationOutcome;

/// History file name.
const HISTORY_FILE: &str = "history.jsonl";

/// Baseline file name.
const BASELINE_FILE: &str = "baseline.json";

/// Pattern log file name.
const PATTERNS_FILE: &str = "patterns.jsonl";

/// Every Nth iteration appends an analysis entry.
pub const ANALYSIS_INTERVAL: u64 = 10;

/// Number of trailing iteration records an analysis covers.
pub const ANALYSIS_WINDOW: usize = 10;

/// What [`RunLedger::record_iteration`] did beyond the plain append.
#[derive(Debug, Clone, Default)]
pub struct RecordReceipt {
    /// Baseline fields that strictly improved.
    pub baseline_improved: Vec<&'static str>,

    /// The analysis entry appended this iteration, if it was due.
    pub analysis: Option<AnalysisRecord>,
}

/// The append-only run ledger.
pub struct RunLedger {
    dir: PathBuf,
}

impl RunLedger {
    /// Open (and create if needed) the ledger in the given state directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    fn baseline_path(&self) -> PathBuf {
        self.dir.join(BASELINE_FILE)
    }

    fn patterns_path(&self) -> PathBuf {
        self.dir.join(PATTERNS_FILE)
    }

    // ------------------------------------------------------------------------
    // Reads (pure folds over history)
    // ------------------------------------------------------------------------

    /// All entries in append order. Corrupt lines are skipped with a log
    /// line.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&path)?;
        let mut entries = Vec::new();

        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    "Skipping corrupt ledger line {} in {}: {}",
                    lineno + 1,
                    path.display(),
                    e
                ),
            }
        }

        Ok(entries)
    }

    /// Iteration records only, in append order.
    pub fn iterations(&self) -> Result<Vec<IterationRecord>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter_map(|e| match e {
                LedgerEntry::Iteration(r) => Some(r),
                _ => None,
            })
            .collect())
    }

    /// Number the next iteration should carry.
    ///
    /// Derived from the highest persisted iteration number; an uncommitted
    /// in-memory counter is never trusted.
    pub fn next_iteration(&self) -> Result<u64> {
        let max = self
            .entries()?
            .iter()
            .map(|e| match e {
                LedgerEntry::Iteration(r) => r.iteration,
                LedgerEntry::Rollback(r) => r.iteration,
                LedgerEntry::Analysis(r) => r.iteration,
            })
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    /// Focus of the most recent completed iterations, newest first, up to
    /// `limit`.
    pub fn recent_focus(&self, limit: usize) -> Result<Vec<FocusArea>> {
        let mut iterations = self.iterations()?;
        iterations.reverse();
        Ok(iterations.iter().take(limit).map(|r| r.focus).collect())
    }

    /// Outcome of the most recent completed iteration.
    pub fn last_result(&self) -> Result<Option<IterationOutcome>> {
        Ok(self.iterations()?.last().map(|r| r.outcome))
    }

    /// Load the baseline; missing or corrupt files yield the default.
    pub fn baseline(&self) -> Result<Baseline> {
        let path = self.baseline_path();
        if !path.exists() {
            return Ok(Baseline::default());
        }

        let contents = fs::read_to_string(&path)?;
        match serde_json::from_str(&contents) {
            Ok(baseline) => Ok(baseline),
            Err(e) => {
                warn!(
                    "Corrupt baseline at {}: {}. Starting fresh.",
                    path.display(),
                    e
                );
                Ok(Baseline::default())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Record a completed iteration.
    ///
    /// Appends the iteration entry, folds the after-snapshot into the
    /// baseline, appends a pattern entry on SUCCESS, and appends the
    /// trailing-window analysis when the iteration number is a multiple of
    /// [`ANALYSIS_INTERVAL`].
    pub fn record_iteration(
        &self,
        record: IterationRecord,
        performance: Option<f32>,
    ) -> Result<RecordReceipt> {
        let mut receipt = RecordReceipt::default();

        self.append(&LedgerEntry::Iteration(record.clone()))?;

        let mut baseline = self.baseline()?;
        let improved = baseline.update_from(&record.after, performance, record.iteration);
        if !improved.is_empty() {
            self.write_baseline(&baseline)?;
            info!("Baseline improved: {}", improved.join(", "));
        }
        receipt.baseline_improved = improved;

        if record.outcome == IterationOutcome::Success {
            self.append_pattern(&PatternEntry {
                iteration: record.iteration,
                mode: record.mode,
                focus: record.focus,
                delta_summary: record.delta.summary(),
                changed_files: record.changed_files.clone(),
                recorded_at: chrono::Utc::now(),
            })?;
        }

        if record.iteration % ANALYSIS_INTERVAL == 0 {
            let analysis = self.analyze(record.iteration)?;
            self.append(&LedgerEntry::Analysis(analysis.clone()))?;
            debug!(
                "Appended analysis for iteration {} ({} records)",
                record.iteration, analysis.window
            );
            receipt.analysis = Some(analysis);
        }

        Ok(receipt)
    }

    /// Record a completed rollback.
    pub fn record_rollback(&self, record: RollbackRecord) -> Result<()> {
        self.append(&LedgerEntry::Rollback(record))
    }

    /// Compute trailing-window statistics: success rate per focus area and
    /// the most frequent downgrade reasons.
    pub fn analyze(&self, iteration: u64) -> Result<AnalysisRecord> {
        let iterations = self.iterations()?;
        let window: Vec<&IterationRecord> =
            iterations.iter().rev().take(ANALYSIS_WINDOW).collect();

        let mut by_focus: BTreeMap<String, FocusStats> = BTreeMap::new();
        for record in &window {
            let stats = by_focus
                .entry(record.focus.to_string())
                .or_insert(FocusStats {
                    focus: record.focus,
                    iterations: 0,
                    successes: 0,
                });
            stats.iterations += 1;
            if record.outcome == IterationOutcome::Success {
                stats.successes += 1;
            }
        }

        let mut reason_counts: BTreeMap<&str, u32> = BTreeMap::new();
        for record in &window {
            if record.outcome == IterationOutcome::Failed {
                for reason in &record.reasons {
                    *reason_counts.entry(reason.as_str()).or_insert(0) += 1;
                }
            }
        }
        let mut recurring: Vec<RecurringFailure> = reason_counts
            .into_iter()
            .map(|(description, occurrences)| RecurringFailure {
                description: description.to_string(),
                occurrences,
            })
            .collect();
        recurring.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
        recurring.truncate(3);

        Ok(AnalysisRecord {
            iteration,
            window: window.len(),
            focus_stats: by_focus.into_values().collect(),
            recurring_failures: recurring,
            recorded_at: chrono::Utc::now(),
        })
    }

    fn append(&self, entry: &LedgerEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        append_line(&self.history_path(), &line)
    }

    fn append_pattern(&self, entry: &PatternEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        append_line(&self.patterns_path(), &line)
    }

    /// Rewrite the baseline atomically (temp file + rename).
    fn write_baseline(&self, baseline: &Baseline) -> Result<()> {
        let path = self.baseline_path();
        let tmp = path.with_extension("json.tmp");

        let mut file = File::create(&tmp)?;
        file.write_all(serde_json::to_string_pretty(baseline)?.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;

        Ok(())
    }
}

/// Append one line under an exclusive advisory lock.
fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    FileExt::lock_exclusive(&file)
        .map_err(|e| EvolveError::ledger(format!("failed to lock {}: {e}", path.display())))?;

    writeln!(file, "{line}")?;
    file.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSnapshot;
    use crate::mode::IterationMode;
    use tempfile::TempDir;

    fn ledger() -> (RunLedger, TempDir) {
        let dir = TempDir::new().unwrap();
        let ledger = RunLedger::open(dir.path().join(".evolve")).unwrap();
        (ledger, dir)
    }

    fn record(iteration: u64, focus: FocusArea, outcome: IterationOutcome) -> IterationRecord {
        let before = MetricsSnapshot::new().with_test_counts(10, 0);
        let after = MetricsSnapshot::new().with_test_counts(12, 0);
        let delta = before.delta(&after);

        IterationRecord {
            iteration,
            mode: IterationMode::Standard,
            mode_rule: "standard".to_string(),
            focus,
            focus_trigger: None,
            health: 75,
            before,
            after,
            delta,
            outcome,
            severe_regression: false,
            reasons: Vec::new(),
            changed_files: vec!["src/lib.rs".to_string()],
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
            duration_secs: 90,
        }
    }

    #[test]
    fn test_next_iteration_starts_at_one() {
        let (ledger, _dir) = ledger();
        assert_eq!(ledger.next_iteration().unwrap(), 1);
    }

    #[test]
    fn test_next_iteration_derives_from_history() {
        let (ledger, _dir) = ledger();
        ledger
            .record_iteration(record(1, FocusArea::Frontend, IterationOutcome::Success), None)
            .unwrap();
        ledger
            .record_iteration(record(2, FocusArea::Backend, IterationOutcome::Partial), None)
            .unwrap();

        assert_eq!(ledger.next_iteration().unwrap(), 3);
    }

    #[test]
    fn test_round_trip_last_focus_and_result() {
        // persisting and reconstructing yields the values used at decision
        // time
        let (ledger, _dir) = ledger();
        ledger
            .record_iteration(record(1, FocusArea::Database, IterationOutcome::Partial), None)
            .unwrap();

        assert_eq!(
            ledger.recent_focus(3).unwrap(),
            vec![FocusArea::Database]
        );
        assert_eq!(
            ledger.last_result().unwrap(),
            Some(IterationOutcome::Partial)
        );
    }

    #[test]
    fn test_recent_focus_newest_first() {
        let (ledger, _dir) = ledger();
        for (i, focus) in [FocusArea::Frontend, FocusArea::Backend, FocusArea::Docs]
            .into_iter()
            .enumerate()
        {
            ledger
                .record_iteration(
                    record(i as u64 + 1, focus, IterationOutcome::Success),
                    None,
                )
                .unwrap();
        }

        assert_eq!(
            ledger.recent_focus(2).unwrap(),
            vec![FocusArea::Docs, FocusArea::Backend]
        );
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let (ledger, dir) = ledger();
        ledger
            .record_iteration(record(1, FocusArea::Frontend, IterationOutcome::Success), None)
            .unwrap();

        let path = dir.path().join(".evolve").join(HISTORY_FILE);
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("this is not json\n");
        fs::write(&path, contents).unwrap();

        ledger
            .record_iteration(record(2, FocusArea::Backend, IterationOutcome::Success), None)
            .unwrap();

        assert_eq!(ledger.iterations().unwrap().len(), 2);
        assert_eq!(ledger.next_iteration().unwrap(), 3);
    }

    #[test]
    fn test_baseline_persisted_only_on_improvement() {
        let (ledger, _dir) = ledger();

        let receipt = ledger
            .record_iteration(record(1, FocusArea::Frontend, IterationOutcome::Success), None)
            .unwrap();
        assert!(receipt.baseline_improved.contains(&"test_count"));
        assert_eq!(ledger.baseline().unwrap().test_count, Some(12));

        // same after-snapshot: nothing improves, baseline untouched
        let receipt = ledger
            .record_iteration(record(2, FocusArea::Backend, IterationOutcome::Success), None)
            .unwrap();
        assert!(receipt.baseline_improved.is_empty());
        assert_eq!(ledger.baseline().unwrap().updated_iteration, Some(1));
    }

    #[test]
    fn test_pattern_log_appended_on_success_only() {
        let (ledger, dir) = ledger();
        ledger
            .record_iteration(record(1, FocusArea::Frontend, IterationOutcome::Success), None)
            .unwrap();
        ledger
            .record_iteration(record(2, FocusArea::Backend, IterationOutcome::Failed), None)
            .unwrap();

        let patterns = fs::read_to_string(dir.path().join(".evolve").join(PATTERNS_FILE)).unwrap();
        assert_eq!(patterns.lines().count(), 1);
        assert!(patterns.contains("\"iteration\":1"));
    }

    #[test]
    fn test_analysis_appended_every_tenth_iteration() {
        let (ledger, _dir) = ledger();

        for i in 1..=10u64 {
            let outcome = if i % 2 == 0 {
                IterationOutcome::Success
            } else {
                IterationOutcome::Partial
            };
            let receipt = ledger
                .record_iteration(record(i, FocusArea::Backend, outcome), None)
                .unwrap();

            if i < 10 {
                assert!(receipt.analysis.is_none());
            } else {
                let analysis = receipt.analysis.expect("analysis due at iteration 10");
                assert_eq!(analysis.window, 10);
                let backend = &analysis.focus_stats[0];
                assert_eq!(backend.iterations, 10);
                assert_eq!(backend.successes, 5);
            }
        }

        // the analysis entry is persisted alongside iteration entries
        let entries = ledger.entries().unwrap();
        assert!(entries
            .iter()
            .any(|e| matches!(e, LedgerEntry::Analysis(_))));
    }

    #[test]
    fn test_analysis_counts_recurring_failure_reasons() {
        let (ledger, _dir) = ledger();

        for i in 1..=3u64 {
            let mut r = record(i, FocusArea::Testing, IterationOutcome::Failed);
            r.reasons = vec!["critical-path tests failing: auth::login".to_string()];
            ledger.record_iteration(r, None).unwrap();
        }

        let analysis = ledger.analyze(3).unwrap();
        assert_eq!(analysis.recurring_failures.len(), 1);
        assert_eq!(analysis.recurring_failures[0].occurrences, 3);
    }

    #[test]
    fn test_rollback_entry_persisted() {
        let (ledger, _dir) = ledger();
        ledger
            .record_rollback(RollbackRecord {
                iteration: 4,
                failed_branch: "failed-evolve/iter-0004-standard".to_string(),
                restored_hash: "abc".to_string(),
                previous_hash: "def".to_string(),
                recorded_at: chrono::Utc::now(),
            })
            .unwrap();

        let entries = ledger.entries().unwrap();
        assert!(matches!(entries[0], LedgerEntry::Rollback(ref r) if r.iteration == 4));
        // rollback entries advance the derived iteration counter too
        assert_eq!(ledger.next_iteration().unwrap(), 5);
    }

    #[test]
    fn test_empty_ledger_reads() {
        let (ledger, _dir) = ledger();
        assert!(ledger.entries().unwrap().is_empty());
        assert!(ledger.recent_focus(3).unwrap().is_empty());
        assert!(ledger.last_result().unwrap().is_none());
        assert_eq!(ledger.baseline().unwrap(), Baseline::default());
    }
}
