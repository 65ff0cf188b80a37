//! Custom error types for Evolve.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the control loop.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Evolve operations
#[derive(Error, Debug)]
pub enum EvolveError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Iteration Lifecycle Errors
    // =========================================================================
    /// An iteration is already in flight against this repository
    #[error("Iteration {iteration} is already in flight (state file: {state_file})")]
    Busy {
        iteration: u64,
        state_file: PathBuf,
    },

    /// A previous rollback did not complete
    #[error(
        "Rollback for iteration {iteration} is pending; resolve it before starting a new iteration"
    )]
    RollbackPending { iteration: u64 },

    /// No in-flight iteration to complete
    #[error("No iteration in flight: {detail}")]
    NotInFlight { detail: String },

    /// Iteration left in an unrecoverable intermediate state
    #[error("Iteration {iteration} is incomplete: {detail}")]
    Incomplete { iteration: u64, detail: String },

    // =========================================================================
    // Probe Errors
    // =========================================================================
    /// Probe command could not be spawned at all
    #[error("Probe '{probe}' failed to start: {message}")]
    ProbeSpawn { probe: String, message: String },

    /// Extraction pattern is not a valid regex
    #[error("Invalid pattern for '{field}': {message}")]
    Pattern { field: String, message: String },

    // =========================================================================
    // Workspace Errors
    // =========================================================================
    /// Git operation failed
    #[error("Git operation failed: {operation} - {message}")]
    Git { operation: String, message: String },

    /// Missing required tool
    #[error("Missing required tool: {tool}")]
    MissingTool { tool: String },

    /// The project directory is not a git repository
    #[error("Not a git repository: {path}")]
    NotARepository { path: PathBuf },

    // =========================================================================
    // Ledger Errors
    // =========================================================================
    /// Ledger read/write failed
    #[error("Ledger error: {message}")]
    Ledger { message: String },

    /// Failure record resolution rejected
    #[error("Cannot resolve failure '{key}': {reason}")]
    FailureResolution { key: String, reason: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EvolveError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create a git error
    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Git {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a ledger error
    pub fn ledger(message: impl Into<String>) -> Self {
        Self::Ledger {
            message: message.into(),
        }
    }

    /// Create a probe spawn error
    pub fn probe(probe: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProbeSpawn {
            probe: probe.into(),
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is recoverable within the current run
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Git { .. } | Self::ProbeSpawn { .. } | Self::Ledger { .. }
        )
    }

    /// Check if this error is a hard refusal with no side effects
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::RollbackPending { .. })
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Busy { .. } => 2,
            Self::RollbackPending { .. } | Self::Incomplete { .. } => 3,
            Self::MissingTool { .. } | Self::NotARepository { .. } => 4,
            Self::Config { .. } | Self::InvalidConfig { .. } | Self::Pattern { .. } => 5,
            _ => 1,
        }
    }
}

/// Type alias for Evolve results
pub type Result<T> = std::result::Result<T, EvolveError>;
