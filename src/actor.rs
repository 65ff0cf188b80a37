//! The external actor seam.
//!
//! The loop is opaque about who edits the tree: an [`Actor`] is handed the
//! briefing path at the suspension point and is expected to leave its
//! changes in the working tree. The built-in [`CommandActor`] shells out to
//! a configured command; a human can instead drive the split `begin` /
//! `complete` CLI subcommands and no actor runs at all.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{EvolveError, Result};

/// File name of the briefing written for the actor.
pub const BRIEFING_FILE: &str = "BRIEFING.md";

/// Performs the change step of an iteration.
#[async_trait]
pub trait Actor: Send + Sync {
    /// Short description for logs and reports.
    fn describe(&self) -> String;

    /// Perform changes in the project's working tree.
    ///
    /// The briefing file renders the current iteration state (mode, focus,
    /// health, open failures). The loop expects no return value beyond
    /// "changes are present in the working tree when this resolves"; an
    /// error here is logged and the iteration still proceeds to
    /// re-measurement.
    async fn perform(&self, project_dir: &Path, briefing_path: &Path) -> Result<()>;
}

/// Actor that runs a configured shell command.
///
/// The command receives the briefing path in `EVOLVE_BRIEFING` and runs in
/// the project directory.
pub struct CommandActor {
    command: String,
    timeout: Option<Duration>,
}

impl CommandActor {
    /// Create an actor from a command string.
    #[must_use]
    pub fn new(command: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Actor for CommandActor {
    fn describe(&self) -> String {
        format!("command: {}", self.command)
    }

    async fn perform(&self, project_dir: &Path, briefing_path: &Path) -> Result<()> {
        info!("Running actor command: {}", self.command);

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(project_dir)
            .env("EVOLVE_BRIEFING", briefing_path)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| EvolveError::probe("actor", e.to_string()))?;

        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(result) => result.map_err(|e| EvolveError::probe("actor", e.to_string()))?,
                Err(_) => {
                    return Err(EvolveError::probe(
                        "actor",
                        format!("timed out after {}s", timeout.as_secs()),
                    ));
                }
            },
            None => child
                .wait_with_output()
                .await
                .map_err(|e| EvolveError::probe("actor", e.to_string()))?,
        };

        if !output.status.success() {
            // a non-zero actor exit is the actor's business; the loop will
            // measure whatever was left in the tree
            warn!(
                "Actor command exited with {}; continuing to re-measurement",
                output.status.code().unwrap_or(-1)
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_command_actor_runs_in_project_dir() {
        let dir = TempDir::new().unwrap();
        let actor = CommandActor::new("echo changed > actor-output.txt", None);

        actor
            .perform(dir.path(), &dir.path().join("BRIEFING.md"))
            .await
            .unwrap();

        assert!(dir.path().join("actor-output.txt").exists());
    }

    #[tokio::test]
    async fn test_command_actor_exposes_briefing_path() {
        let dir = TempDir::new().unwrap();
        let actor = CommandActor::new("echo \"$EVOLVE_BRIEFING\" > briefing-path.txt", None);

        let briefing = dir.path().join("BRIEFING.md");
        actor.perform(dir.path(), &briefing).await.unwrap();

        let recorded = std::fs::read_to_string(dir.path().join("briefing-path.txt")).unwrap();
        assert_eq!(recorded.trim(), briefing.to_string_lossy());
    }

    #[tokio::test]
    async fn test_command_actor_nonzero_exit_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let actor = CommandActor::new("exit 3", None);

        assert!(actor
            .perform(dir.path(), &dir.path().join("BRIEFING.md"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_command_actor_timeout_is_an_error() {
        let dir = TempDir::new().unwrap();
        let actor = CommandActor::new("sleep 5", Some(Duration::from_millis(50)));

        let err = actor
            .perform(dir.path(), &dir.path().join("BRIEFING.md"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_describe() {
        let actor = CommandActor::new("claude -p 'improve'", None);
        assert!(actor.describe().contains("claude"));
    }
}
