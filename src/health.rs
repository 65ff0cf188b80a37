//! Health scoring.
//!
//! Combines a [`MetricsSnapshot`] with externally supplied assessments into
//! a single 0-100 health score via a weighted sum:
//!
//! ```text
//! Health = 0.25*Test + 0.15*Quality + 0.20*Security
//!        + 0.15*Performance + 0.10*Logging + 0.15*UX
//! Test = 0.6*BackendPassRate + 0.4*FrontendPassRate
//! Security = max(0, 100 - 20*Critical - 10*High - 2*Medium)
//! ```
//!
//! The weighting is a design choice, configurable through
//! [`HealthWeights`]; the defaults reproduce the formula above exactly.
//! Sub-scores the loop cannot measure default to the neutral midpoint so
//! they neither sink nor inflate the score.

use serde::{Deserialize, Serialize};

use crate::config::Assessments;
use crate::metrics::MetricsSnapshot;

/// Midpoint used for unavailable sub-scores.
pub const NEUTRAL_MIDPOINT: f32 = 50.0;

// ============================================================================
// Weights
// ============================================================================

/// Weights applied to each sub-score. Expected to sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthWeights {
    pub test: f32,
    pub quality: f32,
    pub security: f32,
    pub performance: f32,
    pub logging: f32,
    pub ux: f32,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            test: 0.25,
            quality: 0.15,
            security: 0.20,
            performance: 0.15,
            logging: 0.10,
            ux: 0.15,
        }
    }
}

// ============================================================================
// Sub-scores
// ============================================================================

/// The six sub-scores feeding the health formula, each on 0-100, plus the
/// debt pressure score consumed by mode selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub test: f32,
    pub quality: f32,
    pub security: f32,
    pub performance: f32,
    pub logging: f32,
    pub ux: f32,
    pub debt: f32,
}

impl SubScores {
    /// Derive sub-scores from a snapshot and external assessments.
    #[must_use]
    pub fn derive(snapshot: &MetricsSnapshot, assessments: &Assessments) -> Self {
        Self {
            test: test_health(snapshot),
            quality: assessments.quality.unwrap_or(NEUTRAL_MIDPOINT),
            security: security_score(snapshot),
            performance: assessments.performance.unwrap_or(NEUTRAL_MIDPOINT),
            logging: assessments.logging.unwrap_or(NEUTRAL_MIDPOINT),
            ux: assessments.ux.unwrap_or(NEUTRAL_MIDPOINT),
            debt: assessments.debt.unwrap_or_else(|| debt_score(snapshot)),
        }
    }
}

/// Test health on 0-100: 60% backend pass rate, 40% frontend pass rate.
///
/// A single-suite project uses its one rate for both terms; with no
/// measurable tests at all the score is the neutral midpoint, keeping
/// "unmeasurable" distinct from "everything fails".
fn test_health(snapshot: &MetricsSnapshot) -> f32 {
    let backend = snapshot.backend_pass_rate();
    let frontend = snapshot.frontend_pass_rate();

    match (backend, frontend) {
        (Some(b), Some(f)) => (0.6 * b + 0.4 * f) * 100.0,
        (Some(b), None) => b * 100.0,
        (None, Some(f)) => f * 100.0,
        (None, None) => NEUTRAL_MIDPOINT,
    }
}

/// Security on 0-100: `max(0, 100 - 20*Critical - 10*High - 2*Medium)`.
///
/// An unavailable audit scores the neutral midpoint, not a clean 100.
fn security_score(snapshot: &MetricsSnapshot) -> f32 {
    let Some(counts) = snapshot.security else {
        return NEUTRAL_MIDPOINT;
    };

    (100.0 - 20.0 * counts.critical as f32 - 10.0 * counts.high as f32 - 2.0 * counts.medium as f32)
        .max(0.0)
}

/// Debt pressure derived from TODO and lint counts when no assessment is
/// supplied.
fn debt_score(snapshot: &MetricsSnapshot) -> f32 {
    match snapshot.todo_comments {
        Some(todos) => {
            let warnings = snapshot.lint_warnings.unwrap_or(0);
            (2.0 * todos as f32 + warnings as f32).min(100.0)
        }
        None => NEUTRAL_MIDPOINT,
    }
}

// ============================================================================
// Score
// ============================================================================

/// Compute the health score, clamped to [0, 100].
///
/// Pure and deterministic: the same sub-scores and weights always yield the
/// same score.
#[must_use]
pub fn health_score(scores: &SubScores, weights: &HealthWeights) -> u8 {
    let raw = weights.test * scores.test
        + weights.quality * scores.quality
        + weights.security * scores.security
        + weights.performance * scores.performance
        + weights.logging * scores.logging
        + weights.ux * scores.ux;

    raw.round().clamp(0.0, 100.0) as u8
}
