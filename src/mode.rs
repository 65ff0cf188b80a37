//! Iteration mode selection.
//!
//! A mode is the declared activity profile for one iteration. Selection is
//! an explicit ordered list of named `(predicate, mode)` rules evaluated in
//! sequence; the first rule whose predicate holds wins, so declaration order
//! is the tie-break. The final rule always applies, making selection total.
//!
//! # Example
//!
//! ```
//! use evolve::mode::{select_mode, IterationMode, ModeInputs};
//!
//! let inputs = ModeInputs {
//!     health: 38,
//!     critical_findings: 1,
//!     ..ModeInputs::nominal(1)
//! };
//!
//! // the security rule is checked before the emergency rule
//! assert_eq!(select_mode(&inputs).mode, IterationMode::Security);
//! ```

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Iteration Mode
// ============================================================================

/// The activity profile declared for one iteration.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IterationMode {
    Security,
    Emergency,
    TestQuality,
    UxCoherence,
    Logging,
    Documentation,
    Performance,
    Architecture,
    Recovery,
    DebtPayment,
    Feature,
    Standard,
}

impl fmt::Display for IterationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Security => "security",
            Self::Emergency => "emergency",
            Self::TestQuality => "test-quality",
            Self::UxCoherence => "ux-coherence",
            Self::Logging => "logging",
            Self::Documentation => "documentation",
            Self::Performance => "performance",
            Self::Architecture => "architecture",
            Self::Recovery => "recovery",
            Self::DebtPayment => "debt-payment",
            Self::Feature => "feature",
            Self::Standard => "standard",
        };
        write!(f, "{s}")
    }
}

impl IterationMode {
    /// Advisory time/effort split across sub-activities, as
    /// `(activity, percent)` pairs summing to 100.
    ///
    /// Consumed by the external actor through the briefing; the loop itself
    /// never enforces it.
    #[must_use]
    pub fn effort_split(&self) -> &'static [(&'static str, u8)] {
        match self {
            Self::Security => &[
                ("security fixes", 60),
                ("security tests", 25),
                ("dependency updates", 15),
            ],
            Self::Emergency => &[("stabilization", 70), ("test repair", 30)],
            Self::TestQuality => &[
                ("new tests", 50),
                ("flaky test repair", 30),
                ("coverage gaps", 20),
            ],
            Self::UxCoherence => &[
                ("ux consistency", 60),
                ("accessibility", 25),
                ("copy review", 15),
            ],
            Self::Logging => &[
                ("log coverage", 55),
                ("log levels and context", 30),
                ("noise reduction", 15),
            ],
            Self::Documentation => &[
                ("api docs", 45),
                ("guides", 35),
                ("examples", 20),
            ],
            Self::Performance => &[
                ("profiling", 30),
                ("hot path fixes", 50),
                ("regression tests", 20),
            ],
            Self::Architecture => &[
                ("structural refactor", 60),
                ("seam tests", 25),
                ("docs", 15),
            ],
            Self::Recovery => &[
                ("failing tests", 50),
                ("bug fixes", 35),
                ("cleanup", 15),
            ],
            Self::DebtPayment => &[
                ("debt items", 60),
                ("todo burn-down", 25),
                ("tests", 15),
            ],
            Self::Feature => &[
                ("feature work", 55),
                ("feature tests", 30),
                ("docs", 15),
            ],
            Self::Standard => &[
                ("tests", 35),
                ("quality review", 20),
                ("small improvements", 20),
                ("ux", 15),
                ("logging", 5),
                ("debt", 5),
            ],
        }
    }
}

// ============================================================================
// Selection Inputs
// ============================================================================

/// Everything mode selection looks at.
///
/// Assembled once per iteration from the fresh health sub-scores, the
/// before-snapshot, the ledger, and the failure recorder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeInputs {
    /// Composite health score, 0-100.
    pub health: u8,

    /// Iteration number (1-based).
    pub iteration: u64,

    /// Critical security findings in the before-snapshot.
    pub critical_findings: u32,

    /// Open HIGH-priority failure records.
    pub critical_failure_count: u32,

    /// Test sub-score, 0-100. Always measurable (defaults to the neutral
    /// midpoint when no tests ran, which never triggers the rule).
    pub test_quality: f32,

    /// Externally assessed quality score, 0-100. `None` means unassessed,
    /// which never triggers quality-gated rules.
    pub quality: Option<f32>,

    /// Externally assessed UX score, 0-100.
    pub ux: Option<f32>,

    /// Externally assessed logging score, 0-100.
    pub logging: Option<f32>,

    /// Debt pressure score, 0-100.
    pub debt: f32,

    /// Whether performance regressed against the baseline.
    pub performance_regressed: bool,

    /// Structural-debt indicators (repeated-failure escalation).
    pub structural_debt: bool,
}

impl ModeInputs {
    /// Inputs for a healthy project at the given iteration; useful as a
    /// baseline to override per test or per caller.
    #[must_use]
    pub fn nominal(iteration: u64) -> Self {
        Self {
            health: 80,
            iteration,
            critical_findings: 0,
            critical_failure_count: 0,
            test_quality: 80.0,
            quality: Some(80.0),
            ux: Some(80.0),
            logging: Some(80.0),
            debt: 20.0,
            performance_regressed: false,
            structural_debt: false,
        }
    }
}

// ============================================================================
// Rule Table
// ============================================================================

/// One guarded rule in the selection table.
pub struct ModeRule {
    /// Stable rule name, recorded in the ledger for auditability.
    pub name: &'static str,

    /// The mode chosen when the guard holds.
    pub mode: IterationMode,

    /// The guard.
    pub applies: fn(&ModeInputs) -> bool,
}

/// The ordered rule table. First match wins.
pub const RULES: &[ModeRule] = &[
    ModeRule {
        name: "critical-security-finding",
        mode: IterationMode::Security,
        applies: |i| i.critical_findings > 0,
    },
    ModeRule {
        name: "emergency",
        mode: IterationMode::Emergency,
        applies: |i| i.health < 40 || i.critical_failure_count > 3,
    },
    ModeRule {
        name: "low-test-quality",
        mode: IterationMode::TestQuality,
        applies: |i| i.test_quality < 50.0,
    },
    ModeRule {
        name: "low-ux",
        mode: IterationMode::UxCoherence,
        applies: |i| i.ux.is_some_and(|v| v < 60.0),
    },
    ModeRule {
        name: "low-logging",
        mode: IterationMode::Logging,
        applies: |i| i.logging.is_some_and(|v| v < 60.0),
    },
    ModeRule {
        name: "security-cadence",
        mode: IterationMode::Security,
        applies: |i| i.iteration % 30 == 0,
    },
    ModeRule {
        name: "logging-cadence",
        mode: IterationMode::Logging,
        applies: |i| i.iteration % 25 == 0,
    },
    ModeRule {
        name: "documentation-cadence",
        mode: IterationMode::Documentation,
        applies: |i| i.iteration % 20 == 0,
    },
    ModeRule {
        name: "ux-cadence",
        mode: IterationMode::UxCoherence,
        applies: |i| i.iteration % 18 == 0,
    },
    ModeRule {
        name: "performance-cadence",
        mode: IterationMode::Performance,
        applies: |i| i.iteration % 15 == 0 && i.performance_regressed,
    },
    ModeRule {
        name: "quality-cadence",
        mode: IterationMode::TestQuality,
        applies: |i| i.iteration % 12 == 0 && i.quality.is_some_and(|v| v < 70.0),
    },
    ModeRule {
        name: "architecture-cadence",
        mode: IterationMode::Architecture,
        applies: |i| i.iteration % 10 == 0 && i.structural_debt,
    },
    ModeRule {
        name: "recovery",
        mode: IterationMode::Recovery,
        applies: |i| i.health < 70,
    },
    ModeRule {
        name: "debt-payment",
        mode: IterationMode::DebtPayment,
        applies: |i| i.debt > 80.0,
    },
    ModeRule {
        name: "feature",
        mode: IterationMode::Feature,
        applies: |i| i.health > 85 && i.iteration % 5 == 0,
    },
    ModeRule {
        name: "standard",
        mode: IterationMode::Standard,
        applies: |_| true,
    },
];

/// Result of mode selection: the mode and the rule that chose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSelection {
    pub mode: IterationMode,
    pub rule: &'static str,
}

/// Select the mode for an iteration. Total and deterministic.
#[must_use]
pub fn select_mode(inputs: &ModeInputs) -> ModeSelection {
    let rule = RULES
        .iter()
        .find(|r| (r.applies)(inputs))
        .expect("the final rule is unconditional");

    ModeSelection {
        mode: rule.mode,
        rule: rule.name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_precedes_emergency() {
        // even at emergency-level health, a critical finding wins because
        // the security rule is declared first
        let inputs = ModeInputs {
            health: 38,
            critical_findings: 1,
            ..ModeInputs::nominal(1)
        };

        let selection = select_mode(&inputs);
        assert_eq!(selection.mode, IterationMode::Security);
        assert_eq!(selection.rule, "critical-security-finding");
    }

    #[test]
    fn test_emergency_on_low_health() {
        let inputs = ModeInputs {
            health: 35,
            ..ModeInputs::nominal(1)
        };
        assert_eq!(select_mode(&inputs).mode, IterationMode::Emergency);
    }

    #[test]
    fn test_emergency_on_repeated_critical_failures() {
        let inputs = ModeInputs {
            critical_failure_count: 4,
            ..ModeInputs::nominal(1)
        };
        assert_eq!(select_mode(&inputs).mode, IterationMode::Emergency);
    }

    #[test]
    fn test_low_test_quality() {
        let inputs = ModeInputs {
            test_quality: 49.9,
            ..ModeInputs::nominal(1)
        };
        assert_eq!(select_mode(&inputs).mode, IterationMode::TestQuality);
    }

    #[test]
    fn test_low_ux_and_logging_order() {
        let inputs = ModeInputs {
            ux: Some(55.0),
            logging: Some(55.0),
            ..ModeInputs::nominal(1)
        };
        // both fire; ux is declared first
        assert_eq!(select_mode(&inputs).mode, IterationMode::UxCoherence);
    }

    #[test]
    fn test_unassessed_scores_never_trigger() {
        // an unconfigured project must not be stuck in assessment-gated modes
        let inputs = ModeInputs {
            quality: None,
            ux: None,
            logging: None,
            ..ModeInputs::nominal(12)
        };
        assert_eq!(select_mode(&inputs).mode, IterationMode::Standard);
    }

    #[test]
    fn test_cadence_rules() {
        let nominal = ModeInputs::nominal(30);
        assert_eq!(select_mode(&nominal).mode, IterationMode::Security);

        let nominal = ModeInputs::nominal(25);
        assert_eq!(select_mode(&nominal).mode, IterationMode::Logging);

        let nominal = ModeInputs::nominal(20);
        assert_eq!(select_mode(&nominal).mode, IterationMode::Documentation);

        let nominal = ModeInputs::nominal(18);
        assert_eq!(select_mode(&nominal).mode, IterationMode::UxCoherence);
    }

    #[test]
    fn test_cadence_tie_break_by_declaration_order() {
        // 90 is a multiple of 30, 18, and 15; the 30-cadence is declared first
        let inputs = ModeInputs {
            performance_regressed: true,
            ..ModeInputs::nominal(90)
        };
        let selection = select_mode(&inputs);
        assert_eq!(selection.mode, IterationMode::Security);
        assert_eq!(selection.rule, "security-cadence");
    }

    #[test]
    fn test_performance_cadence_requires_regression() {
        let without = ModeInputs::nominal(15);
        assert_ne!(select_mode(&without).mode, IterationMode::Performance);

        let with = ModeInputs {
            performance_regressed: true,
            ..ModeInputs::nominal(15)
        };
        assert_eq!(select_mode(&with).mode, IterationMode::Performance);
    }

    #[test]
    fn test_quality_cadence() {
        let inputs = ModeInputs {
            quality: Some(65.0),
            ..ModeInputs::nominal(12)
        };
        assert_eq!(select_mode(&inputs).mode, IterationMode::TestQuality);

        // off-cadence, the same quality score does not trigger
        let inputs = ModeInputs {
            quality: Some(65.0),
            ..ModeInputs::nominal(13)
        };
        assert_eq!(select_mode(&inputs).mode, IterationMode::Standard);
    }

    #[test]
    fn test_architecture_cadence_requires_structural_debt() {
        let inputs = ModeInputs {
            structural_debt: true,
            ..ModeInputs::nominal(10)
        };
        assert_eq!(select_mode(&inputs).mode, IterationMode::Architecture);

        assert_ne!(
            select_mode(&ModeInputs::nominal(10)).mode,
            IterationMode::Architecture
        );
    }

    #[test]
    fn test_recovery_below_70() {
        let inputs = ModeInputs {
            health: 69,
            ..ModeInputs::nominal(1)
        };
        assert_eq!(select_mode(&inputs).mode, IterationMode::Recovery);
    }

    #[test]
    fn test_debt_payment() {
        let inputs = ModeInputs {
            debt: 81.0,
            ..ModeInputs::nominal(1)
        };
        assert_eq!(select_mode(&inputs).mode, IterationMode::DebtPayment);
    }

    #[test]
    fn test_feature_needs_health_and_cadence() {
        let inputs = ModeInputs {
            health: 90,
            ..ModeInputs::nominal(5)
        };
        assert_eq!(select_mode(&inputs).mode, IterationMode::Feature);

        let inputs = ModeInputs {
            health: 90,
            ..ModeInputs::nominal(6)
        };
        assert_eq!(select_mode(&inputs).mode, IterationMode::Standard);
    }

    #[test]
    fn test_standard_fallback() {
        assert_eq!(
            select_mode(&ModeInputs::nominal(7)).mode,
            IterationMode::Standard
        );
    }

    #[test]
    fn test_selection_is_total_and_deterministic() {
        // sweep a band of inputs; every tuple yields exactly one mode and the
        // same mode on re-evaluation
        for health in [0u8, 39, 40, 69, 70, 85, 86, 100] {
            for iteration in 1..=60u64 {
                let inputs = ModeInputs {
                    health,
                    ..ModeInputs::nominal(iteration)
                };
                let first = select_mode(&inputs);
                let second = select_mode(&inputs);
                assert_eq!(first.mode, second.mode);
                assert_eq!(first.rule, second.rule);
            }
        }
    }

    #[test]
    fn test_effort_splits_sum_to_100() {
        for mode in [
            IterationMode::Security,
            IterationMode::Emergency,
            IterationMode::TestQuality,
            IterationMode::UxCoherence,
            IterationMode::Logging,
            IterationMode::Documentation,
            IterationMode::Performance,
            IterationMode::Architecture,
            IterationMode::Recovery,
            IterationMode::DebtPayment,
            IterationMode::Feature,
            IterationMode::Standard,
        ] {
            let total: u32 = mode.effort_split().iter().map(|(_, p)| u32::from(*p)).sum();
            assert_eq!(total, 100, "split for {mode} must sum to 100");
        }
    }

    #[test]
    fn test_standard_split_matches_declared_profile() {
        let split = IterationMode::Standard.effort_split();
        assert_eq!(split[0], ("tests", 35));
        assert_eq!(split[1], ("quality review", 20));
    }

    #[test]
    fn test_display_names_are_branch_safe() {
        assert_eq!(IterationMode::DebtPayment.to_string(), "debt-payment");
        assert_eq!(IterationMode::UxCoherence.to_string(), "ux-coherence");
    }
}
