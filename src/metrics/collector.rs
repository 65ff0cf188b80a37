//! Probe execution and snapshot assembly.
//!
//! The control loop never depends on raw tool output formats; it depends on
//! the [`MetricsProbe`] trait, which yields a structured [`ProbeReport`].
//! [`CommandProbe`] is the production implementation: a configured shell
//! command with regex extraction patterns and a bounded timeout.
//!
//! A probe never fails the loop. A non-zero exit is signal (a failing test
//! command still carries a fail count), a timeout or an unmatched pattern is
//! an unavailable measurement.

use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, warn};

use super::{MetricsSnapshot, SecurityCounts, SecuritySeverity};
use crate::config::{PatternConfig, ProbeCommands, ScanConfig};
use crate::error::{EvolveError, Result};

// ============================================================================
// Probe Report
// ============================================================================

/// Structured result of one probe run.
///
/// `None` fields mean the measurement was unavailable: the pattern did not
/// match, the command timed out, or it could not be spawned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    /// Extracted pass count.
    pub passed: Option<u32>,

    /// Extracted fail count.
    pub failed: Option<u32>,

    /// Names of failing tests, when a name pattern is configured.
    pub failing_tests: Vec<String>,

    /// Extracted coverage percentage.
    pub coverage: Option<f32>,

    /// Extracted lint warning count.
    pub warnings: Option<u32>,

    /// Security findings by severity; `None` when no finding pattern matched
    /// and the command did not complete cleanly.
    pub findings: Option<SecurityCounts>,

    /// Whether the command hit its timeout.
    pub timed_out: bool,

    /// Exit code of the command, when it ran to completion.
    pub exit_code: Option<i32>,
}

impl ProbeReport {
    /// A report where nothing was measured (spawn failure or timeout).
    #[must_use]
    pub fn unavailable() -> Self {
        Self::default()
    }
}

// ============================================================================
// MetricsProbe Trait
// ============================================================================

/// A capability that measures one aspect of the project.
///
/// Implementations run whatever tool they wrap and translate its output into
/// a [`ProbeReport`]. The control loop treats each probe as an opaque
/// blocking call with a timeout.
#[async_trait]
pub trait MetricsProbe: Send + Sync {
    /// Short name for logs and reports.
    fn name(&self) -> &str;

    /// Run the probe against the project directory.
    async fn run(&self, project_dir: &Path) -> ProbeReport;
}

// ============================================================================
// Command Probe
// ============================================================================

/// Compiled extraction patterns for a [`CommandProbe`].
#[derive(Debug, Clone, Default)]
pub struct ProbePatterns {
    pub pass: Option<Regex>,
    pub fail: Option<Regex>,
    pub failing_test: Option<Regex>,
    pub coverage: Option<Regex>,
    pub warning: Option<Regex>,
    pub finding_critical: Option<Regex>,
    pub finding_high: Option<Regex>,
    pub finding_medium: Option<Regex>,
    pub finding_low: Option<Regex>,
}

impl ProbePatterns {
    /// Compile patterns from configuration strings.
    ///
    /// # Errors
    ///
    /// Returns [`EvolveError::Pattern`] naming the offending field when a
    /// pattern is not valid regex.
    pub fn compile(config: &PatternConfig) -> Result<Self> {
        fn compile_one(field: &str, source: &Option<String>) -> Result<Option<Regex>> {
            match source {
                Some(s) => Regex::new(s).map(Some).map_err(|e| EvolveError::Pattern {
                    field: field.to_string(),
                    message: e.to_string(),
                }),
                None => Ok(None),
            }
        }

        Ok(Self {
            pass: compile_one("pass", &config.pass)?,
            fail: compile_one("fail", &config.fail)?,
            failing_test: compile_one("failing_test", &config.failing_test)?,
            coverage: compile_one("coverage", &config.coverage)?,
            warning: compile_one("warning", &config.warning)?,
            finding_critical: compile_one("finding_critical", &config.finding_critical)?,
            finding_high: compile_one("finding_high", &config.finding_high)?,
            finding_medium: compile_one("finding_medium", &config.finding_medium)?,
            finding_low: compile_one("finding_low", &config.finding_low)?,
        })
    }

    fn has_finding_patterns(&self) -> bool {
        self.finding_critical.is_some()
            || self.finding_high.is_some()
            || self.finding_medium.is_some()
            || self.finding_low.is_some()
    }
}

/// A shell-invoked measurement command with text extraction patterns.
///
/// The command runs through `sh -c` in the project directory with combined
/// stdout/stderr capture and a bounded timeout.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    name: String,
    command: String,
    patterns: ProbePatterns,
    timeout: Duration,
}

impl CommandProbe {
    /// Create a probe from a command string and compiled patterns.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        patterns: ProbePatterns,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            patterns,
            timeout,
        }
    }

    /// The configured command string.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Extract a report from already-captured output.
    ///
    /// Split out from [`MetricsProbe::run`] so parsing is testable without
    /// spawning processes.
    #[must_use]
    pub fn parse_output(&self, output: &str, exit_code: Option<i32>) -> ProbeReport {
        let passed = extract_count(&self.patterns.pass, output);
        let failed = extract_count(&self.patterns.fail, output);

        let failing_tests = match &self.patterns.failing_test {
            Some(re) => re
                .captures_iter(output)
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect(),
            None => Vec::new(),
        };

        let coverage = self
            .patterns
            .coverage
            .as_ref()
            .and_then(|re| re.captures(output))
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f32>().ok())
            .map(|v| v.clamp(0.0, 100.0));

        let warnings = extract_count(&self.patterns.warning, output);

        let findings = if self.patterns.has_finding_patterns() {
            let mut counts = SecurityCounts::default();
            for (severity, pattern) in [
                (SecuritySeverity::Critical, &self.patterns.finding_critical),
                (SecuritySeverity::High, &self.patterns.finding_high),
                (SecuritySeverity::Medium, &self.patterns.finding_medium),
                (SecuritySeverity::Low, &self.patterns.finding_low),
            ] {
                for _ in 0..count_findings(pattern, output) {
                    counts.record(severity);
                }
            }
            Some(counts)
        } else {
            None
        };

        ProbeReport {
            passed,
            failed,
            failing_tests,
            coverage,
            warnings,
            findings,
            timed_out: false,
            exit_code,
        }
    }
}

#[async_trait]
impl MetricsProbe for CommandProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, project_dir: &Path) -> ProbeReport {
        debug!("Running probe '{}': {}", self.name, self.command);

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let child = match child {
            Ok(c) => c,
            Err(e) => {
                warn!("Probe '{}' failed to spawn: {}", self.name, e);
                return ProbeReport::unavailable();
            }
        };

        // Wait for output with timeout. On timeout the child is cleaned up
        // when dropped; the measurement is simply unavailable.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Probe '{}' failed to read output: {}", self.name, e);
                return ProbeReport::unavailable();
            }
            Err(_) => {
                warn!(
                    "Probe '{}' timed out after {}s",
                    self.name,
                    self.timeout.as_secs()
                );
                return ProbeReport {
                    timed_out: true,
                    ..ProbeReport::unavailable()
                };
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push('\n');
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        self.parse_output(&combined, output.status.code())
    }
}

/// Extract a numeric count via the first match's first capture group.
fn extract_count(pattern: &Option<Regex>, output: &str) -> Option<u32> {
    pattern
        .as_ref()?
        .captures(output)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Count findings for one severity pattern.
///
/// A match with a numeric first capture group contributes that value (for
/// tools that print `3 critical`); a match without one counts as a single
/// finding (for tools that print one line per finding).
fn count_findings(pattern: &Option<Regex>, output: &str) -> u32 {
    let Some(re) = pattern else { return 0 };

    re.captures_iter(output)
        .map(|c| {
            c.get(1)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(1)
        })
        .sum()
}

// ============================================================================
// Metrics Collector
// ============================================================================

/// Configuration for [`MetricsCollector`].
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Probe command strings and patterns.
    pub commands: ProbeCommands,

    /// Tree-scan settings for LOC and TODO counting.
    pub scan: ScanConfig,

    /// Timeout applied to each probe command.
    pub command_timeout: Duration,
}

/// Runs every configured probe plus a tree scan and assembles a
/// [`MetricsSnapshot`].
pub struct MetricsCollector {
    project_dir: PathBuf,
    test: Option<CommandProbe>,
    frontend: Option<CommandProbe>,
    coverage: Option<CommandProbe>,
    lint: Option<CommandProbe>,
    security: Option<CommandProbe>,
    scan: ScanConfig,
}

impl MetricsCollector {
    /// Build a collector from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when an extraction pattern fails to compile.
    pub fn new(project_dir: impl AsRef<Path>, config: &CollectorConfig) -> Result<Self> {
        let timeout = config.command_timeout;
        let make = |name: &str, cmd: &Option<String>, patterns: &PatternConfig| -> Result<_> {
            match cmd {
                Some(command) => Ok(Some(CommandProbe::new(
                    name,
                    command,
                    ProbePatterns::compile(patterns)?,
                    timeout,
                ))),
                None => Ok(None),
            }
        };

        let c = &config.commands;
        Ok(Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            test: make("tests", &c.test, &c.test_patterns)?,
            frontend: make("frontend-tests", &c.frontend_test, &c.frontend_patterns)?,
            coverage: make("coverage", &c.coverage, &c.coverage_patterns)?,
            lint: make("lint", &c.lint, &c.lint_patterns)?,
            security: make("security", &c.security, &c.security_patterns)?,
            scan: config.scan.clone(),
        })
    }

    /// Capture a snapshot of the project.
    ///
    /// Probes run strictly sequentially; each is an opaque call with its own
    /// timeout. This method never fails: every problem degrades to an
    /// unavailable measurement.
    pub async fn collect(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::new();

        if let Some(probe) = &self.test {
            let report = probe.run(&self.project_dir).await;
            snapshot.tests_passed = report.passed;
            snapshot.tests_failed = report.failed;
            snapshot.failing_tests = report.failing_tests;
            // A test command that exits non-zero with no pass match still ran;
            // zero passes with the extracted fail count is the honest reading.
            if snapshot.tests_passed.is_none()
                && snapshot.tests_failed.is_some()
                && !report.timed_out
            {
                snapshot.tests_passed = Some(0);
            }
        }

        if let Some(probe) = &self.frontend {
            let report = probe.run(&self.project_dir).await;
            snapshot.frontend_passed = report.passed;
            snapshot.frontend_failed = report.failed;
            snapshot
                .failing_tests
                .extend(report.failing_tests.into_iter());
        }

        if let Some(probe) = &self.coverage {
            let report = probe.run(&self.project_dir).await;
            snapshot.coverage = report.coverage;
        }

        if let Some(probe) = &self.lint {
            let report = probe.run(&self.project_dir).await;
            snapshot.lint_warnings = report.warnings;
        }

        if let Some(probe) = &self.security {
            let report = probe.run(&self.project_dir).await;
            snapshot.security = report.findings;
        }

        let (loc, todos) = self.scan_tree();
        snapshot.lines_of_code = loc;
        snapshot.todo_comments = todos;
        snapshot.captured_at = chrono::Utc::now();

        debug!("Captured snapshot: {}", snapshot.summary());
        snapshot
    }

    /// Count lines of code and TODO/FIXME comments across tracked sources.
    ///
    /// Uses gitignore-aware walking; unreadable files are skipped with a log
    /// line rather than failing the measurement.
    fn scan_tree(&self) -> (Option<u32>, Option<u32>) {
        let mut loc: u32 = 0;
        let mut todos: u32 = 0;
        let mut scanned_any = false;

        let walker = ignore::WalkBuilder::new(&self.project_dir).build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Scan skipped an entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
                continue;
            };

            if !self.scan.source_extensions.iter().any(|s| s == ext) {
                continue;
            }

            match std::fs::read_to_string(entry.path()) {
                Ok(contents) => {
                    scanned_any = true;
                    loc += contents.lines().count() as u32;
                    todos += contents
                        .lines()
                        .filter(|l| l.contains("TODO") || l.contains("FIXME"))
                        .count() as u32;
                }
                Err(e) => {
                    debug!("Scan could not read {}: {}", entry.path().display(), e);
                }
            }
        }

        if scanned_any {
            (Some(loc), Some(todos))
        } else {
            (None, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatternConfig;

    fn cargo_style_patterns() -> ProbePatterns {
        ProbePatterns::compile(&PatternConfig {
            pass: Some(r"(\d+) passed".to_string()),
            fail: Some(r"(\d+) failed".to_string()),
            failing_test: Some(r"(?m)^test (\S+) \.\.\. FAILED$".to_string()),
            coverage: Some(r"([\d.]+)% coverage".to_string()),
            ..Default::default()
        })
        .expect("patterns compile")
    }

    fn probe(patterns: ProbePatterns) -> CommandProbe {
        CommandProbe::new("tests", "true", patterns, Duration::from_secs(5))
    }

    #[test]
    fn test_parse_pass_fail_counts() {
        let probe = probe(cargo_style_patterns());
        let output = "test result: FAILED. 60 passed; 3 failed; 0 ignored";

        let report = probe.parse_output(output, Some(101));
        assert_eq!(report.passed, Some(60));
        assert_eq!(report.failed, Some(3));
        assert_eq!(report.exit_code, Some(101));
    }

    #[test]
    fn test_parse_failing_test_names() {
        let probe = probe(cargo_style_patterns());
        let output = "test auth::login_works ... FAILED\ntest math::adds ... ok\n\
                      test payment::charge ... FAILED\n60 passed; 2 failed";

        let report = probe.parse_output(output, Some(101));
        assert_eq!(
            report.failing_tests,
            vec!["auth::login_works", "payment::charge"]
        );
    }

    #[test]
    fn test_parse_no_match_is_unavailable() {
        let probe = probe(cargo_style_patterns());
        let report = probe.parse_output("nothing useful here", Some(0));

        assert!(report.passed.is_none());
        assert!(report.failed.is_none());
        assert!(report.coverage.is_none());
    }

    #[test]
    fn test_parse_coverage() {
        let probe = probe(cargo_style_patterns());
        let report = probe.parse_output("32.5% coverage, 1024/3150 lines", Some(0));
        assert_eq!(report.coverage, Some(32.5));
    }

    #[test]
    fn test_finding_count_per_line() {
        let patterns = ProbePatterns::compile(&PatternConfig {
            finding_critical: Some(r"(?m)^CRITICAL:".to_string()),
            finding_medium: Some(r"(?m)^MEDIUM:".to_string()),
            ..Default::default()
        })
        .unwrap();
        let probe = probe(patterns);

        let output = "CRITICAL: sql injection\nMEDIUM: weak hash\nMEDIUM: http url";
        let report = probe.parse_output(output, Some(1));

        let findings = report.findings.unwrap();
        assert_eq!(findings.critical, 1);
        assert_eq!(findings.medium, 2);
    }

    #[test]
    fn test_finding_count_from_capture() {
        let patterns = ProbePatterns::compile(&PatternConfig {
            finding_high: Some(r"(\d+) high".to_string()),
            ..Default::default()
        })
        .unwrap();
        let probe = probe(patterns);

        let report = probe.parse_output("found 4 high, 0 low", Some(1));
        assert_eq!(report.findings.unwrap().high, 4);
    }

    #[test]
    fn test_no_finding_patterns_means_unavailable() {
        let probe = probe(cargo_style_patterns());
        let report = probe.parse_output("all good", Some(0));
        assert!(report.findings.is_none());
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let result = ProbePatterns::compile(&PatternConfig {
            pass: Some("(unclosed".to_string()),
            ..Default::default()
        });

        match result {
            Err(EvolveError::Pattern { field, .. }) => assert_eq!(field, "pass"),
            other => panic!("expected pattern error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_run_nonzero_exit_is_signal_not_fatal() {
        let patterns = ProbePatterns::compile(&PatternConfig {
            pass: Some(r"(\d+) passed".to_string()),
            fail: Some(r"(\d+) failed".to_string()),
            ..Default::default()
        })
        .unwrap();

        let probe = CommandProbe::new(
            "tests",
            "echo '0 passed; 5 failed'; exit 1",
            patterns,
            Duration::from_secs(5),
        );

        let report = probe.run(Path::new(".")).await;
        assert_eq!(report.passed, Some(0));
        assert_eq!(report.failed, Some(5));
        assert_eq!(report.exit_code, Some(1));
        assert!(!report.timed_out);
    }

    #[tokio::test]
    async fn test_run_timeout_is_unavailable() {
        let probe = CommandProbe::new(
            "slow",
            "sleep 5",
            ProbePatterns::default(),
            Duration::from_millis(50),
        );

        let report = probe.run(Path::new(".")).await;
        assert!(report.timed_out);
        assert!(report.passed.is_none());
    }

    #[tokio::test]
    async fn test_run_reads_stderr_too() {
        let patterns = ProbePatterns::compile(&PatternConfig {
            fail: Some(r"(\d+) failed".to_string()),
            ..Default::default()
        })
        .unwrap();

        let probe = CommandProbe::new(
            "tests",
            "echo '2 failed' 1>&2",
            patterns,
            Duration::from_secs(5),
        );

        let report = probe.run(Path::new(".")).await;
        assert_eq!(report.failed, Some(2));
    }
}
