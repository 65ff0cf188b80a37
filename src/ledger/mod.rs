//! Run ledger types.
//!
//! The ledger is the sole source of truth for cross-iteration memory:
//! iteration numbers, last focus, last result, and the best-ever baseline
//! are always derived by folding the persisted history, never kept in a
//! mutable in-process counter.

pub mod store;

pub use store::{RunLedger, ANALYSIS_INTERVAL, ANALYSIS_WINDOW};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::focus::FocusArea;
use crate::metrics::{MetricsDelta, MetricsSnapshot};
use crate::mode::IterationMode;
use crate::workspace::IterationOutcome;

// ============================================================================
// Ledger Entries
// ============================================================================

/// One line of the append-only history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEntry {
    Iteration(IterationRecord),
    Rollback(RollbackRecord),
    Analysis(AnalysisRecord),
}

/// Full record of one completed iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u64,
    pub mode: IterationMode,
    /// Name of the selection rule that chose the mode.
    pub mode_rule: String,
    pub focus: FocusArea,
    /// Hard trigger that overrode rotation, if any.
    pub focus_trigger: Option<String>,
    /// Health score at the start of the iteration.
    pub health: u8,
    pub before: MetricsSnapshot,
    pub after: MetricsSnapshot,
    pub delta: MetricsDelta,
    pub outcome: IterationOutcome,
    pub severe_regression: bool,
    /// Downgrade reasons, in evaluation order.
    pub reasons: Vec<String>,
    pub changed_files: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: u64,
}

/// Record of a completed rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub iteration: u64,
    pub failed_branch: String,
    pub restored_hash: String,
    pub previous_hash: String,
    pub recorded_at: DateTime<Utc>,
}

/// Trailing-window statistics appended every [`ANALYSIS_INTERVAL`]th
/// iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub iteration: u64,
    /// Number of iteration records the analysis covered.
    pub window: usize,
    pub focus_stats: Vec<FocusStats>,
    pub recurring_failures: Vec<RecurringFailure>,
    pub recorded_at: DateTime<Utc>,
}

/// Success rate for one focus area over the analysis window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusStats {
    pub focus: FocusArea,
    pub iterations: u32,
    pub successes: u32,
}

impl FocusStats {
    /// Success rate in [0.0, 1.0].
    #[must_use]
    pub fn success_rate(&self) -> f32 {
        if self.iterations == 0 {
            0.0
        } else {
            self.successes as f32 / self.iterations as f32
        }
    }
}

/// A failure description and how often it recurred in the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringFailure {
    pub description: String,
    pub occurrences: u32,
}

/// Entry of the successful-fix pattern log, appended on SUCCESS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub iteration: u64,
    pub mode: IterationMode,
    pub focus: FocusArea,
    pub delta_summary: String,
    pub changed_files: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// Baseline
// ============================================================================

/// Best-ever-recorded values, updated only on strict improvement.
///
/// All tracked fields are high-water marks; an iteration that matches but
/// does not exceed a field leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub coverage: Option<f32>,
    pub test_count: Option<u32>,
    pub performance: Option<f32>,
    pub lines_of_code: Option<u32>,
    /// Iteration that last improved any field.
    pub updated_iteration: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Baseline {
    /// Fold an after-snapshot into the baseline.
    ///
    /// Returns the names of fields that strictly improved; an empty result
    /// means the baseline was untouched.
    pub fn update_from(
        &mut self,
        after: &MetricsSnapshot,
        performance: Option<f32>,
        iteration: u64,
    ) -> Vec<&'static str> {
        let mut improved = Vec::new();

        if let Some(cov) = after.coverage {
            if self.coverage.is_none_or(|b| cov > b) {
                self.coverage = Some(cov);
                improved.push("coverage");
            }
        }

        if let Some(passed) = after.tests_passed {
            if self.test_count.is_none_or(|b| passed > b) {
                self.test_count = Some(passed);
                improved.push("test_count");
            }
        }

        if let Some(perf) = performance {
            if self.performance.is_none_or(|b| perf > b) {
                self.performance = Some(perf);
                improved.push("performance");
            }
        }

        if let Some(loc) = after.lines_of_code {
            if self.lines_of_code.is_none_or(|b| loc > b) {
                self.lines_of_code = Some(loc);
                improved.push("lines_of_code");
            }
        }

        if !improved.is_empty() {
            self.updated_iteration = Some(iteration);
            self.updated_at = Some(Utc::now());
        }

        improved
    }

    /// Whether the given performance score is strictly below the baseline.
    #[must_use]
    pub fn performance_regressed(&self, current: Option<f32>) -> bool {
        match (self.performance, current) {
            (Some(baseline), Some(current)) => current < baseline,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_updates_on_strict_improvement() {
        let mut baseline = Baseline::default();
        let after = MetricsSnapshot::new()
            .with_test_counts(50, 0)
            .with_coverage(40.0);

        let improved = baseline.update_from(&after, Some(70.0), 1);
        assert_eq!(improved, vec!["coverage", "test_count", "performance"]);
        assert_eq!(baseline.test_count, Some(50));
        assert_eq!(baseline.updated_iteration, Some(1));
    }

    #[test]
    fn test_baseline_untouched_on_equal_values() {
        let mut baseline = Baseline::default();
        let after = MetricsSnapshot::new().with_test_counts(50, 0);
        baseline.update_from(&after, None, 1);

        let improved = baseline.update_from(&after, None, 2);
        assert!(improved.is_empty());
        assert_eq!(baseline.updated_iteration, Some(1));
    }

    #[test]
    fn test_baseline_untouched_on_regression() {
        let mut baseline = Baseline::default();
        baseline.update_from(
            &MetricsSnapshot::new().with_test_counts(50, 0),
            Some(80.0),
            1,
        );

        let worse = MetricsSnapshot::new().with_test_counts(40, 10);
        let improved = baseline.update_from(&worse, Some(60.0), 2);
        assert!(improved.is_empty());
        assert_eq!(baseline.test_count, Some(50));
        assert_eq!(baseline.performance, Some(80.0));
    }

    #[test]
    fn test_baseline_ignores_unavailable_fields() {
        let mut baseline = Baseline::default();
        let improved = baseline.update_from(&MetricsSnapshot::new(), None, 1);
        assert!(improved.is_empty());
        assert_eq!(baseline, Baseline::default());
    }

    #[test]
    fn test_performance_regressed() {
        let mut baseline = Baseline::default();
        baseline.update_from(&MetricsSnapshot::new(), Some(80.0), 1);

        assert!(baseline.performance_regressed(Some(70.0)));
        assert!(!baseline.performance_regressed(Some(80.0)));
        assert!(!baseline.performance_regressed(Some(90.0)));
        assert!(!baseline.performance_regressed(None));
    }

    #[test]
    fn test_focus_stats_rate() {
        let stats = FocusStats {
            focus: FocusArea::Backend,
            iterations: 4,
            successes: 3,
        };
        assert!((stats.success_rate() - 0.75).abs() < f32::EPSILON);

        let empty = FocusStats {
            focus: FocusArea::Docs,
            iterations: 0,
            successes: 0,
        };
        assert_eq!(empty.success_rate(), 0.0);
    }

    #[test]
    fn test_ledger_entry_tagged_serialization() {
        let entry = LedgerEntry::Rollback(RollbackRecord {
            iteration: 4,
            failed_branch: "failed-evolve/iter-0004-emergency".to_string(),
            restored_hash: "abc".to_string(),
            previous_hash: "def".to_string(),
            recorded_at: Utc::now(),
        });

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"type\":\"rollback\""));

        let back: LedgerEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }
}
