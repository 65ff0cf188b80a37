//! Configuration loading for the evolution loop.
//!
//! Project configuration lives in `evolve.toml` at the project root. Every
//! section is optional; a missing file yields pure defaults, which assume a
//! Rust project measured with `cargo test`.
//!
//! # Example
//!
//! ```toml
//! [commands]
//! test = "cargo test"
//! coverage = "cargo tarpaulin"
//! security = "cargo audit"
//!
//! [commands.security_patterns]
//! finding_critical = "(?m)^Crate: .*critical"
//!
//! [regression]
//! severe_test_drop = 6
//! critical_path_keywords = ["login", "payment", "auth", "core"]
//!
//! [assessments]
//! ux = 72.0
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EvolveError, Result};
use crate::health::HealthWeights;
use crate::workspace::outcome::RegressionPolicy;

/// Directory under the project root holding all persisted loop state.
pub const STATE_DIR: &str = ".evolve";

/// Configuration file name at the project root.
pub const CONFIG_FILE: &str = "evolve.toml";

// ============================================================================
// Command and Pattern Configuration
// ============================================================================

/// Regex pattern strings for extracting signals from one command's output.
///
/// Each pattern's first capture group carries the value (a count, a
/// percentage, or a test name). Finding patterns without a numeric capture
/// count one finding per match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub pass: Option<String>,
    pub fail: Option<String>,
    pub failing_test: Option<String>,
    pub coverage: Option<String>,
    pub warning: Option<String>,
    pub finding_critical: Option<String>,
    pub finding_high: Option<String>,
    pub finding_medium: Option<String>,
    pub finding_low: Option<String>,
}

impl PatternConfig {
    /// Patterns matching `cargo test` summary lines.
    #[must_use]
    pub fn cargo_test() -> Self {
        Self {
            pass: Some(r"(\d+) passed".to_string()),
            fail: Some(r"(\d+) failed".to_string()),
            failing_test: Some(r"(?m)^test (\S+) \.\.\. FAILED$".to_string()),
            ..Default::default()
        }
    }

    /// Patterns matching `cargo tarpaulin`-style coverage output.
    #[must_use]
    pub fn tarpaulin() -> Self {
        Self {
            coverage: Some(r"([\d.]+)% coverage".to_string()),
            ..Default::default()
        }
    }
}

/// Shell commands the collector may run, with their extraction patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeCommands {
    /// Primary (backend) test command.
    pub test: Option<String>,
    pub test_patterns: PatternConfig,

    /// Optional frontend test command.
    pub frontend_test: Option<String>,
    pub frontend_patterns: PatternConfig,

    /// Coverage command.
    pub coverage: Option<String>,
    pub coverage_patterns: PatternConfig,

    /// Lint command.
    pub lint: Option<String>,
    pub lint_patterns: PatternConfig,

    /// Security audit command.
    pub security: Option<String>,
    pub security_patterns: PatternConfig,
}

impl Default for ProbeCommands {
    fn default() -> Self {
        Self {
            test: Some("cargo test".to_string()),
            test_patterns: PatternConfig::cargo_test(),
            frontend_test: None,
            frontend_patterns: PatternConfig::default(),
            coverage: None,
            coverage_patterns: PatternConfig::tarpaulin(),
            lint: None,
            lint_patterns: PatternConfig {
                warning: Some(r"(\d+) warnings?".to_string()),
                ..Default::default()
            },
            security: None,
            security_patterns: PatternConfig::default(),
        }
    }
}

/// Tree-scan settings for LOC and TODO counting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// File extensions counted as source.
    pub source_extensions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            source_extensions: [
                "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "rb", "c", "h", "cpp", "html",
                "css", "sql", "sh",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        }
    }
}

// ============================================================================
// Assessments and Timeouts
// ============================================================================

/// Externally supplied sub-scores (0-100) for signals the loop cannot
/// measure itself. Absent values default to the neutral midpoint when
/// scoring, so they neither sink nor inflate health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Assessments {
    pub quality: Option<f32>,
    pub performance: Option<f32>,
    pub logging: Option<f32>,
    pub ux: Option<f32>,
    /// Technical-debt pressure; when absent it is derived from TODO and lint
    /// counts at scoring time.
    pub debt: Option<f32>,
}

/// Timeout settings, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Applied to each probe command.
    pub command_secs: u64,

    /// Applied to the actor command; `None` waits indefinitely.
    pub actor_secs: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_secs: 600,
            actor_secs: None,
        }
    }
}

/// External actor settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Command run at the suspension point when driving iterations with
    /// `evolve run`. Absent means iterations must be driven manually with
    /// `begin` / `complete`.
    pub command: Option<String>,
}

// ============================================================================
// Project Configuration
// ============================================================================

/// Full project configuration, loaded from `evolve.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolveConfig {
    pub commands: ProbeCommands,
    pub scan: ScanConfig,
    pub timeouts: TimeoutConfig,
    pub weights: HealthWeights,
    pub assessments: Assessments,
    pub regression: RegressionPolicy,
    pub actor: ActorConfig,
}

impl EvolveConfig {
    /// Load configuration from `evolve.toml` in the project directory.
    ///
    /// A missing file yields defaults; a malformed file is an error.
    ///
    /// # Errors
    ///
    /// Returns [`EvolveError::Config`] when the file exists but cannot be
    /// read or parsed.
    pub fn load(project_dir: impl AsRef<Path>) -> Result<Self> {
        let path = project_dir.as_ref().join(CONFIG_FILE);

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)
            .map_err(|e| EvolveError::config_with_path(e.to_string(), path.clone()))?;

        toml::from_str(&contents)
            .map_err(|e| EvolveError::config_with_path(e.to_string(), path.clone()))
    }

    /// Probe command timeout as a [`Duration`].
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.command_secs)
    }

    /// State directory under the project root.
    #[must_use]
    pub fn state_dir(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(STATE_DIR)
    }
}

// ============================================================================
// Environment Preflight
// ============================================================================

/// Verify the git environment before the loop touches the repository.
///
/// # Errors
///
/// - [`EvolveError::MissingTool`] when `git` is not on `PATH`.
/// - [`EvolveError::NotARepository`] when the project has no `.git`.
pub fn verify_git_environment(project_dir: impl AsRef<Path>) -> Result<()> {
    let project_dir = project_dir.as_ref();

    if which::which("git").is_err() {
        return Err(EvolveError::MissingTool {
            tool: "git".to_string(),
        });
    }

    if !project_dir.join(".git").exists() {
        return Err(EvolveError::NotARepository {
            path: project_dir.to_path_buf(),
        });
    }

    Ok(())
}
