//! Failure recording and escalation.
//!
//! Blocked issues are event-sourced: every occurrence and resolution is
//! appended to `failures.jsonl`, and a [`FailureRecord`] is a pure fold over
//! those events, keyed by a digest of the normalized issue description.
//! Records are never deleted; a recurrence after resolution reopens the
//! record and keeps incrementing its occurrence count.
//!
//! An unresolved record escalates when it has recurred (two or more
//! occurrences) or carries HIGH priority; escalation feeds the mode
//! selector's structural-debt indicator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{EvolveError, Result};

/// Failure log file name under the state directory.
const FAILURES_FILE: &str = "failures.jsonl";

/// Occurrence count at which an unresolved record escalates.
const ESCALATION_OCCURRENCES: u32 = 2;

// ============================================================================
// Priority
// ============================================================================

/// Priority of a blocked issue. Ordered so `High` compares greatest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum FailurePriority {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for FailurePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// One line of the append-only failure log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureEvent {
    Blocked {
        key: String,
        description: String,
        priority: FailurePriority,
        attempted_remedies: Vec<String>,
        iteration: u64,
        recorded_at: DateTime<Utc>,
    },
    Resolved {
        key: String,
        root_cause: String,
        iteration: u64,
        recorded_at: DateTime<Utc>,
    },
}

// ============================================================================
// Folded Record
// ============================================================================

/// The current view of one issue, folded from its events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Stable key derived from the normalized description.
    pub key: String,

    pub description: String,

    /// Highest priority seen across occurrences.
    pub priority: FailurePriority,

    /// Every remedy attempted across occurrences, in first-seen order.
    pub attempted_remedies: Vec<String>,

    /// Root cause supplied at resolution, when resolved.
    pub root_cause: Option<String>,

    /// How many times the issue has been recorded.
    pub occurrences: u32,

    pub first_seen_iteration: u64,
    pub last_seen_iteration: u64,

    /// Whether the latest event for this issue is a resolution.
    pub resolved: bool,
}

impl FailureRecord {
    /// Whether this record raises the repeated-failure escalation flag.
    #[must_use]
    pub fn escalated(&self) -> bool {
        !self.resolved
            && (self.occurrences >= ESCALATION_OCCURRENCES
                || self.priority == FailurePriority::High)
    }
}

/// Stable key for an issue: SHA-256 of the lowercased,
/// whitespace-collapsed description, truncated for readability.
#[must_use]
pub fn issue_key(description: &str) -> String {
    let normalized = description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(&digest[..6])
}

// ============================================================================
// Recorder
// ============================================================================

/// Appends failure events and folds them into records.
pub struct FailureRecorder {
    path: PathBuf,
}

impl FailureRecorder {
    /// Open (and create if needed) the failure log in the state directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            path: dir.as_ref().join(FAILURES_FILE),
        })
    }

    /// Record a blocked issue, creating or incrementing its record.
    ///
    /// Returns the folded record after the append.
    pub fn record_blocked(
        &self,
        description: impl Into<String>,
        priority: FailurePriority,
        attempted_remedies: Vec<String>,
        iteration: u64,
    ) -> Result<FailureRecord> {
        let description = description.into();
        let key = issue_key(&description);

        self.append(&FailureEvent::Blocked {
            key: key.clone(),
            description,
            priority,
            attempted_remedies,
            iteration,
            recorded_at: Utc::now(),
        })?;

        let record = self
            .records()?
            .into_iter()
            .find(|r| r.key == key)
            .expect("record exists after append");

        debug!(
            "Recorded blocked issue {} (occurrence {})",
            record.key, record.occurrences
        );
        Ok(record)
    }

    /// Mark an issue resolved.
    ///
    /// # Errors
    ///
    /// Rejects an empty root cause (the external actor must fill it in
    /// before the issue can be marked resolved) and unknown keys.
    pub fn resolve(
        &self,
        key: &str,
        root_cause: impl Into<String>,
        iteration: u64,
    ) -> Result<()> {
        let root_cause = root_cause.into();
        if root_cause.trim().is_empty() {
            return Err(EvolveError::FailureResolution {
                key: key.to_string(),
                reason: "a non-empty root cause is required".to_string(),
            });
        }

        if !self.records()?.iter().any(|r| r.key == key) {
            return Err(EvolveError::FailureResolution {
                key: key.to_string(),
                reason: "no such failure record".to_string(),
            });
        }

        self.append(&FailureEvent::Resolved {
            key: key.to_string(),
            root_cause,
            iteration,
            recorded_at: Utc::now(),
        })
    }

    /// Fold all events into records, in first-seen order.
    pub fn records(&self) -> Result<Vec<FailureRecord>> {
        let mut records: BTreeMap<String, FailureRecord> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();

        for event in self.events()? {
            match event {
                FailureEvent::Blocked {
                    key,
                    description,
                    priority,
                    attempted_remedies,
                    iteration,
                    ..
                } => {
                    let record = records.entry(key.clone()).or_insert_with(|| {
                        order.push(key.clone());
                        FailureRecord {
                            key,
                            description: description.clone(),
                            priority,
                            attempted_remedies: Vec::new(),
                            root_cause: None,
                            occurrences: 0,
                            first_seen_iteration: iteration,
                            last_seen_iteration: iteration,
                            resolved: false,
                        }
                    });

                    record.occurrences += 1;
                    record.last_seen_iteration = iteration;
                    record.priority = record.priority.max(priority);
                    record.resolved = false;
                    for remedy in attempted_remedies {
                        if !record.attempted_remedies.contains(&remedy) {
                            record.attempted_remedies.push(remedy);
                        }
                    }
                }
                FailureEvent::Resolved {
                    key, root_cause, ..
                } => {
                    if let Some(record) = records.get_mut(&key) {
                        record.resolved = true;
                        record.root_cause = Some(root_cause);
                    } else {
                        warn!("Resolution for unknown failure key {key}");
                    }
                }
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|k| records.remove(&k))
            .collect())
    }

    /// Unresolved records only.
    pub fn open_records(&self) -> Result<Vec<FailureRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| !r.resolved)
            .collect())
    }

    /// Whether any record raises the escalation flag.
    pub fn escalation(&self) -> Result<bool> {
        Ok(self.records()?.iter().any(FailureRecord::escalated))
    }

    /// Count of open HIGH-priority records, the mode selector's
    /// critical-failure count.
    pub fn high_priority_open_count(&self) -> Result<u32> {
        Ok(self
            .open_records()?
            .iter()
            .filter(|r| r.priority == FailurePriority::High)
            .count() as u32)
    }

    fn events(&self) -> Result<Vec<FailureEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.path)?;
        let mut events = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    "Skipping corrupt failure log line {}: {}",
                    lineno + 1,
                    e
                ),
            }
        }
        Ok(events)
    }

    fn append(&self, event: &FailureEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(event)?)?;
        file.flush()?;
        Ok(())
    }
}
