//! Evolve - autonomous evolution loop for git repositories.
//!
//! Drives iterative, test-gated improvement over a source repository: each
//! iteration measures codebase health, selects a work mode and focus area,
//! opens an isolated branch, suspends for an external actor (human or AI) to
//! make changes, then re-measures, decides SUCCESS / PARTIAL / FAILED,
//! archives the outcome, and merges or rolls back.
//!
//! # Architecture
//!
//! - [`metrics`] - Probe execution and before/after snapshots
//! - [`health`] - Weighted 0-100 health scoring
//! - [`mode`] - Ordered-rule mode selection
//! - [`focus`] - Focus area rotation with hard triggers
//! - [`workspace`] - Branch/checkpoint/merge/rollback state machine
//! - [`ledger`] - Append-only run history and best-ever baseline
//! - [`failure`] - Blocked-issue recording and escalation
//! - [`engine`] - The iteration protocol tying it all together
//! - [`config`] - `evolve.toml` loading and validation
//! - [`error`] - Custom error types and handling
//!
//! # Example
//!
//! ```rust,ignore
//! use evolve::config::EvolveConfig;
//! use evolve::engine::EvolutionEngine;
//! use evolve::actor::CommandActor;
//!
//! let config = EvolveConfig::load(".")?;
//! let engine = EvolutionEngine::new(".", config)?;
//!
//! let actor = CommandActor::new("claude -p \"$(cat $EVOLVE_BRIEFING)\"", None);
//! let report = engine.run_iteration(&actor).await?;
//! println!("{}", report.render());
//! ```

pub mod actor;
pub mod config;
pub mod engine;
pub mod error;
pub mod failure;
pub mod focus;
pub mod health;
pub mod ledger;
pub mod metrics;
pub mod mode;
pub mod state;
pub mod workspace;

// Re-export commonly used types
pub use error::{EvolveError, Result};

// Re-export config types
pub use config::{verify_git_environment, EvolveConfig, PatternConfig, ProbeCommands, ScanConfig};

// Re-export metrics types
pub use metrics::{
    CommandProbe, MetricsCollector, MetricsDelta, MetricsProbe, MetricsSnapshot, ProbeReport,
    SecurityCounts, SecuritySeverity,
};

// Re-export scoring and selection types
pub use focus::{select_focus, FocusArea, FocusSelection};
pub use health::{health_score, HealthWeights, SubScores, NEUTRAL_MIDPOINT};
pub use mode::{select_mode, IterationMode, ModeInputs, ModeSelection};

// Re-export workspace types
pub use workspace::{
    determine_outcome, BranchCheckpoint, IterationOutcome, OutcomeDecision, RegressionPolicy,
    WorkspaceController, WorkspacePhase,
};

// Re-export ledger and failure types
pub use failure::{FailurePriority, FailureRecord, FailureRecorder};
pub use ledger::{AnalysisRecord, Baseline, IterationRecord, LedgerEntry, RunLedger};

// Re-export engine types
pub use actor::{Actor, CommandActor};
pub use engine::{EngineStatus, EvolutionEngine, IterationReport};
pub use state::{IterationState, StateStore};
