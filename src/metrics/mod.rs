//! Metrics collection for the evolution loop.
//!
//! This module defines the point-in-time [`MetricsSnapshot`] captured before
//! and after each iteration, the [`MetricsDelta`] between two snapshots, and
//! the [`collector`] that produces snapshots by running the project's
//! configured commands.
//!
//! # Availability
//!
//! A command that times out, exits without producing a match for its
//! extraction pattern, or cannot be spawned yields an *unavailable*
//! measurement, modeled as `None`. This keeps "no tests ran" distinguishable
//! from "zero failures" for every downstream decision.
//!
//! # Example
//!
//! ```
//! use evolve::metrics::MetricsSnapshot;
//!
//! let before = MetricsSnapshot::new().with_test_counts(60, 3).with_coverage(30.0);
//! let after = MetricsSnapshot::new().with_test_counts(63, 0).with_coverage(32.0);
//!
//! let delta = before.delta(&after);
//! assert_eq!(delta.tests_passed, Some(3));
//! assert_eq!(delta.summary(), "+3 tests, +2% coverage");
//! ```

pub mod collector;

pub use collector::{CollectorConfig, CommandProbe, MetricsCollector, MetricsProbe, ProbeReport};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Security Findings
// ============================================================================

/// Severity of a security finding reported by the audit command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SecuritySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for SecuritySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Security finding counts grouped by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl SecurityCounts {
    /// Total number of findings across all severities.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.critical + self.high + self.medium + self.low
    }

    /// Whether any finding exists at any severity.
    #[must_use]
    pub fn any(&self) -> bool {
        self.total() > 0
    }

    /// Record one finding at the given severity.
    pub fn record(&mut self, severity: SecuritySeverity) {
        match severity {
            SecuritySeverity::Critical => self.critical += 1,
            SecuritySeverity::High => self.high += 1,
            SecuritySeverity::Medium => self.medium += 1,
            SecuritySeverity::Low => self.low += 1,
        }
    }
}

// ============================================================================
// Metrics Snapshot
// ============================================================================

/// Snapshot of project signals captured at a point in time.
///
/// Immutable once captured; two snapshots (before, after) are diffed per
/// iteration. `None` fields mean the measurement was unavailable, not zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Passing tests in the primary (backend) suite.
    pub tests_passed: Option<u32>,

    /// Failing tests in the primary (backend) suite.
    pub tests_failed: Option<u32>,

    /// Passing tests in the frontend suite, when one is configured.
    pub frontend_passed: Option<u32>,

    /// Failing tests in the frontend suite, when one is configured.
    pub frontend_failed: Option<u32>,

    /// Names of failing tests, for critical-path matching.
    #[serde(default)]
    pub failing_tests: Vec<String>,

    /// Test coverage percentage (0.0 - 100.0).
    pub coverage: Option<f32>,

    /// Lint warning count, when a lint command is configured.
    pub lint_warnings: Option<u32>,

    /// Lines of code across tracked source files.
    pub lines_of_code: Option<u32>,

    /// TODO/FIXME comment count across tracked source files.
    pub todo_comments: Option<u32>,

    /// Security findings by severity; `None` when the audit was unavailable.
    pub security: Option<SecurityCounts>,

    /// When the snapshot was captured.
    pub captured_at: DateTime<Utc>,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            tests_passed: None,
            tests_failed: None,
            frontend_passed: None,
            frontend_failed: None,
            failing_tests: Vec::new(),
            coverage: None,
            lint_warnings: None,
            lines_of_code: None,
            todo_comments: None,
            security: None,
            captured_at: Utc::now(),
        }
    }
}

impl MetricsSnapshot {
    /// Create a new snapshot with every measurement unavailable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set primary suite pass/fail counts.
    #[must_use]
    pub fn with_test_counts(mut self, passed: u32, failed: u32) -> Self {
        self.tests_passed = Some(passed);
        self.tests_failed = Some(failed);
        self
    }

    /// Set frontend suite pass/fail counts.
    #[must_use]
    pub fn with_frontend_counts(mut self, passed: u32, failed: u32) -> Self {
        self.frontend_passed = Some(passed);
        self.frontend_failed = Some(failed);
        self
    }

    /// Set the names of failing tests.
    #[must_use]
    pub fn with_failing_tests(mut self, names: Vec<String>) -> Self {
        self.failing_tests = names;
        self
    }

    /// Set coverage percentage.
    #[must_use]
    pub fn with_coverage(mut self, coverage: f32) -> Self {
        self.coverage = Some(coverage.clamp(0.0, 100.0));
        self
    }

    /// Set lint warning count.
    #[must_use]
    pub fn with_lint_warnings(mut self, count: u32) -> Self {
        self.lint_warnings = Some(count);
        self
    }

    /// Set lines of code.
    #[must_use]
    pub fn with_lines_of_code(mut self, loc: u32) -> Self {
        self.lines_of_code = Some(loc);
        self
    }

    /// Set TODO/FIXME comment count.
    #[must_use]
    pub fn with_todo_comments(mut self, count: u32) -> Self {
        self.todo_comments = Some(count);
        self
    }

    /// Set security finding counts.
    #[must_use]
    pub fn with_security(mut self, counts: SecurityCounts) -> Self {
        self.security = Some(counts);
        self
    }

    /// Primary suite pass rate (0.0 - 1.0), `None` when unavailable or empty.
    #[must_use]
    pub fn backend_pass_rate(&self) -> Option<f32> {
        let passed = self.tests_passed?;
        let failed = self.tests_failed.unwrap_or(0);
        let total = passed + failed;
        if total == 0 {
            None
        } else {
            Some(passed as f32 / total as f32)
        }
    }

    /// Frontend suite pass rate (0.0 - 1.0), `None` when unavailable or empty.
    #[must_use]
    pub fn frontend_pass_rate(&self) -> Option<f32> {
        let passed = self.frontend_passed?;
        let failed = self.frontend_failed.unwrap_or(0);
        let total = passed + failed;
        if total == 0 {
            None
        } else {
            Some(passed as f32 / total as f32)
        }
    }

    /// Security counts with unavailable treated as no findings.
    #[must_use]
    pub fn security_counts(&self) -> SecurityCounts {
        self.security.unwrap_or_default()
    }

    /// Total failing tests across both suites, unavailable treated as 0.
    #[must_use]
    pub fn total_failed(&self) -> u32 {
        self.tests_failed.unwrap_or(0) + self.frontend_failed.unwrap_or(0)
    }

    /// Compute the delta from this snapshot to `after`.
    ///
    /// A field is `None` when either side was unavailable.
    #[must_use]
    pub fn delta(&self, after: &MetricsSnapshot) -> MetricsDelta {
        fn diff_u32(before: Option<u32>, after: Option<u32>) -> Option<i64> {
            Some(i64::from(after?) - i64::from(before?))
        }

        MetricsDelta {
            tests_passed: diff_u32(self.tests_passed, after.tests_passed),
            tests_failed: diff_u32(self.tests_failed, after.tests_failed),
            coverage: match (self.coverage, after.coverage) {
                (Some(b), Some(a)) => Some(a - b),
                _ => None,
            },
            lines_of_code: diff_u32(self.lines_of_code, after.lines_of_code),
            todo_comments: diff_u32(self.todo_comments, after.todo_comments),
            security_findings: match (self.security, after.security) {
                (Some(b), Some(a)) => Some(i64::from(a.total()) - i64::from(b.total())),
                _ => None,
            },
        }
    }

    /// Format a one-line summary of the snapshot.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        match (self.tests_passed, self.tests_failed) {
            (Some(p), Some(f)) => parts.push(format!("{}/{} tests passing", p, p + f)),
            _ => parts.push("tests unavailable".to_string()),
        }

        if let (Some(p), Some(f)) = (self.frontend_passed, self.frontend_failed) {
            parts.push(format!("{}/{} frontend", p, p + f));
        }

        if let Some(cov) = self.coverage {
            parts.push(format!("{:.1}% coverage", cov));
        }

        if let Some(sec) = self.security {
            if sec.any() {
                parts.push(format!("{} security findings", sec.total()));
            }
        }

        if let Some(warnings) = self.lint_warnings {
            if warnings > 0 {
                parts.push(format!("{} lint warnings", warnings));
            }
        }

        if let Some(todos) = self.todo_comments {
            if todos > 0 {
                parts.push(format!("{} TODOs", todos));
            }
        }

        parts.join(", ")
    }
}

// ============================================================================
// Metrics Delta
// ============================================================================

/// Difference between two snapshots, suitable for commit messages and the
/// ledger. `None` fields mean one side of the pair was unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsDelta {
    pub tests_passed: Option<i64>,
    pub tests_failed: Option<i64>,
    pub coverage: Option<f32>,
    pub lines_of_code: Option<i64>,
    pub todo_comments: Option<i64>,
    pub security_findings: Option<i64>,
}

impl MetricsDelta {
    /// Format a compact human-readable summary, e.g. `+3 tests, +2% coverage`.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if let Some(d) = self.tests_passed {
            parts.push(format!("{:+} tests", d));
        }

        if let Some(d) = self.coverage {
            if d.abs() >= 0.05 {
                parts.push(format!("{:+.0}% coverage", d));
            }
        }

        if let Some(d) = self.security_findings {
            if d != 0 {
                parts.push(format!("{:+} security findings", d));
            }
        }

        if let Some(d) = self.todo_comments {
            if d != 0 {
                parts.push(format!("{:+} TODOs", d));
            }
        }

        if parts.is_empty() {
            "no measurable change".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Drop in passing tests (positive when tests were lost), 0 when either
    /// side was unavailable.
    #[must_use]
    pub fn pass_drop(&self) -> i64 {
        match self.tests_passed {
            Some(d) if d < 0 => -d,
            _ => 0,
        }
    }
}
