//! Outcome determination.
//!
//! A pure function of the before/after snapshots: the same pair always
//! yields the same decision. The thresholds are heuristics, kept
//! configurable rather than hard-coded.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metrics::MetricsSnapshot;

// ============================================================================
// Outcome
// ============================================================================

/// Result of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IterationOutcome {
    /// No regression; the iteration branch is merged.
    Success,
    /// Some tests were lost but not severely; still merged.
    Partial,
    /// Critical-path failure or severe regression; never merged.
    Failed,
}

impl fmt::Display for IterationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Partial => write!(f, "PARTIAL"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

// ============================================================================
// Regression Policy
// ============================================================================

/// Configurable thresholds for downgrading and rolling back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionPolicy {
    /// A pass-count drop strictly greater than this is a severe regression:
    /// the outcome is FAILED and the iteration is rolled back.
    pub severe_test_drop: u32,

    /// Substrings marking a failing test as critical-path; any match makes
    /// the outcome FAILED. Compared case-insensitively.
    pub critical_path_keywords: Vec<String>,
}

impl Default for RegressionPolicy {
    fn default() -> Self {
        Self {
            severe_test_drop: 6,
            critical_path_keywords: ["login", "payment", "auth", "core"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl RegressionPolicy {
    /// Whether a failing test name touches a critical-path area.
    #[must_use]
    pub fn is_critical_path(&self, test_name: &str) -> bool {
        let lower = test_name.to_lowercase();
        self.critical_path_keywords
            .iter()
            .any(|k| lower.contains(&k.to_lowercase()))
    }
}

// ============================================================================
// Decision
// ============================================================================

/// The outcome plus everything the caller needs to act on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDecision {
    pub outcome: IterationOutcome,

    /// True when the pass-count drop breached the severe threshold; the only
    /// condition that triggers rollback.
    pub severe_regression: bool,

    /// Human-readable reasons, in evaluation order.
    pub reasons: Vec<String>,
}

/// Decide the outcome of an iteration from its before/after snapshots.
///
/// Starts at SUCCESS, downgrades to PARTIAL on any pass-count decrease, and
/// to FAILED on a critical-path failure or a severe drop. Idempotent: the
/// same snapshot pair always yields the same decision.
#[must_use]
pub fn determine_outcome(
    before: &MetricsSnapshot,
    after: &MetricsSnapshot,
    policy: &RegressionPolicy,
) -> OutcomeDecision {
    let delta = before.delta(after);
    let drop = delta.pass_drop();

    let mut outcome = IterationOutcome::Success;
    let mut reasons = Vec::new();

    if drop > 0 {
        outcome = IterationOutcome::Partial;
        reasons.push(format!("{drop} passing tests were lost"));
    }

    let critical: Vec<&String> = after
        .failing_tests
        .iter()
        .filter(|name| policy.is_critical_path(name))
        .collect();

    if !critical.is_empty() {
        outcome = IterationOutcome::Failed;
        reasons.push(format!(
            "critical-path tests failing: {}",
            critical
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }

    let severe_regression = drop > i64::from(policy.severe_test_drop);
    if severe_regression {
        outcome = IterationOutcome::Failed;
        reasons.push(format!(
            "pass-count drop {} exceeds severe threshold {}",
            drop, policy.severe_test_drop
        ));
    }

    OutcomeDecision {
        outcome,
        severe_regression,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(passed: u32, failed: u32) -> MetricsSnapshot {
        MetricsSnapshot::new().with_test_counts(passed, failed)
    }

    #[test]
    fn test_net_improvement_is_success() {
        let before = snap(60, 3).with_coverage(30.0);
        let after = snap(63, 0).with_coverage(32.0);

        let decision = determine_outcome(&before, &after, &RegressionPolicy::default());
        assert_eq!(decision.outcome, IterationOutcome::Success);
        assert!(!decision.severe_regression);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn test_moderate_drop_is_partial_not_severe() {
        let before = snap(50, 0);
        let after = snap(44, 6);

        let decision = determine_outcome(&before, &after, &RegressionPolicy::default());
        assert_eq!(decision.outcome, IterationOutcome::Partial);
        assert!(!decision.severe_regression);
    }

    #[test]
    fn test_critical_path_failure_is_failed() {
        let before = snap(70, 0);
        let after = snap(60, 10)
            .with_failing_tests(vec!["auth::token_refresh".to_string()]);

        let decision = determine_outcome(&before, &after, &RegressionPolicy::default());
        assert_eq!(decision.outcome, IterationOutcome::Failed);
    }

    #[test]
    fn test_drop_beyond_threshold_forces_failed() {
        let before = snap(70, 0);
        let after = snap(63, 7);

        let decision = determine_outcome(&before, &after, &RegressionPolicy::default());
        assert_eq!(decision.outcome, IterationOutcome::Failed);
        assert!(decision.severe_regression);
    }

    #[test]
    fn test_critical_path_without_severe_drop() {
        // FAILED without breaching the severe threshold: no rollback
        let before = snap(70, 0);
        let after = snap(69, 1).with_failing_tests(vec!["payment_capture".to_string()]);

        let decision = determine_outcome(&before, &after, &RegressionPolicy::default());
        assert_eq!(decision.outcome, IterationOutcome::Failed);
        assert!(!decision.severe_regression);
    }

    #[test]
    fn test_improvement_is_success() {
        let decision =
            determine_outcome(&snap(10, 2), &snap(15, 0), &RegressionPolicy::default());
        assert_eq!(decision.outcome, IterationOutcome::Success);
    }

    #[test]
    fn test_unchanged_is_success() {
        let decision =
            determine_outcome(&snap(10, 0), &snap(10, 0), &RegressionPolicy::default());
        assert_eq!(decision.outcome, IterationOutcome::Success);
    }

    #[test]
    fn test_idempotent() {
        let before = snap(70, 0);
        let after = snap(60, 10).with_failing_tests(vec!["core_invariants".to_string()]);
        let policy = RegressionPolicy::default();

        let first = determine_outcome(&before, &after, &policy);
        let second = determine_outcome(&before, &after, &policy);
        assert_eq!(first, second);
    }

    #[test]
    fn test_keyword_match_is_case_insensitive_substring() {
        let policy = RegressionPolicy::default();
        assert!(policy.is_critical_path("test_Login_flow"));
        assert!(policy.is_critical_path("payments::capture_refund"));
        assert!(policy.is_critical_path("AUTH_MIDDLEWARE"));
        assert!(!policy.is_critical_path("render_sidebar"));
    }

    #[test]
    fn test_custom_threshold() {
        let policy = RegressionPolicy {
            severe_test_drop: 2,
            ..RegressionPolicy::default()
        };

        let decision = determine_outcome(&snap(10, 0), &snap(7, 3), &policy);
        assert_eq!(decision.outcome, IterationOutcome::Failed);
        assert!(decision.severe_regression);
    }

    #[test]
    fn test_unavailable_after_counts_do_not_downgrade() {
        // unavailable is not a measured decrease
        let before = snap(50, 0);
        let after = MetricsSnapshot::new();

        let decision = determine_outcome(&before, &after, &RegressionPolicy::default());
        assert_eq!(decision.outcome, IterationOutcome::Success);
    }

    #[test]
    fn test_boundary_drop_exactly_at_threshold() {
        // a drop equal to the threshold is PARTIAL, one more is FAILED
        let policy = RegressionPolicy::default();

        let at = determine_outcome(&snap(50, 0), &snap(44, 6), &policy);
        assert_eq!(at.outcome, IterationOutcome::Partial);

        let over = determine_outcome(&snap(50, 0), &snap(43, 7), &policy);
        assert_eq!(over.outcome, IterationOutcome::Failed);
    }
}
