//! Focus area rotation.
//!
//! Each iteration is aimed at one subsystem category. Hard triggers (many
//! failing tests, any security finding) override rotation; otherwise the
//! next area in fixed rotation order after the most recent recorded focus is
//! chosen, which never repeats the immediately preceding area and never
//! stalls.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metrics::MetricsSnapshot;

/// Fail count above which rotation is overridden toward testing.
pub const FAILING_TEST_TRIGGER: u32 = 5;

// ============================================================================
// Focus Area
// ============================================================================

/// Subsystem category an iteration is aimed at, in rotation order.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FocusArea {
    Frontend,
    Backend,
    Database,
    Testing,
    Docs,
    Security,
    Devops,
    Accessibility,
    Logging,
    Refactor,
}

impl FocusArea {
    /// All areas in fixed rotation order.
    pub const ALL: [FocusArea; 10] = [
        FocusArea::Frontend,
        FocusArea::Backend,
        FocusArea::Database,
        FocusArea::Testing,
        FocusArea::Docs,
        FocusArea::Security,
        FocusArea::Devops,
        FocusArea::Accessibility,
        FocusArea::Logging,
        FocusArea::Refactor,
    ];

    /// The next area in rotation order, wrapping at the end.
    #[must_use]
    pub fn next(&self) -> FocusArea {
        let idx = Self::ALL
            .iter()
            .position(|a| a == self)
            .expect("every area is in ALL");
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for FocusArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Frontend => "frontend",
            Self::Backend => "backend",
            Self::Database => "database",
            Self::Testing => "testing",
            Self::Docs => "docs",
            Self::Security => "security",
            Self::Devops => "devops",
            Self::Accessibility => "accessibility",
            Self::Logging => "logging",
            Self::Refactor => "refactor",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Result of focus selection: the area and the hard trigger that forced it,
/// if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusSelection {
    pub area: FocusArea,
    pub trigger: Option<&'static str>,
}

/// Select the focus for an iteration.
///
/// `recent` holds the focus of the most recent completed iterations, newest
/// first (the ledger supplies up to three).
#[must_use]
pub fn select_focus(snapshot: &MetricsSnapshot, recent: &[FocusArea]) -> FocusSelection {
    if snapshot.total_failed() > FAILING_TEST_TRIGGER {
        return FocusSelection {
            area: FocusArea::Testing,
            trigger: Some("failing-tests"),
        };
    }

    if snapshot.security_counts().any() {
        return FocusSelection {
            area: FocusArea::Security,
            trigger: Some("security-finding"),
        };
    }

    let area = match recent.first() {
        Some(last) => last.next(),
        None => FocusArea::ALL[0],
    };

    FocusSelection {
        area,
        trigger: None,
    }
}
