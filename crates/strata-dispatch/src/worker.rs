//! Worker invocation boundary
//!
//! A worker receives a [`TaskSpec`] and returns exactly one [`Report`]. The
//! analytical content behind that boundary is supplied externally.

use crate::error::WorkerError;
use crate::task::TaskSpec;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use strata_artifact::Report;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Stateless analysis worker
#[async_trait]
pub trait Worker: Send + Sync {
    /// Execute one task
    ///
    /// # Errors
    /// Returns a retryable error for transient failures, a fatal one otherwise
    async fn execute(&self, task: &TaskSpec) -> Result<Report, WorkerError>;

    /// Worker name, for logs
    fn name(&self) -> &str {
        "worker"
    }
}

/// Worker backed by an external process
///
/// The task is written to stdin as JSON; one report is read from stdout.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandWorker {
    /// Create new command worker
    ///
    /// # Errors
    /// Returns `WorkerError::Spawn` if `argv` is empty
    pub fn new(argv: Vec<String>, timeout: Duration) -> Result<Self, WorkerError> {
        if argv.is_empty() {
            return Err(WorkerError::Spawn(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty worker command",
            )));
        }
        Ok(Self { argv, timeout })
    }

    /// Configured command line
    #[inline]
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

#[async_trait]
impl Worker for CommandWorker {
    async fn execute(&self, task: &TaskSpec) -> Result<Report, WorkerError> {
        let input = serde_json::to_vec(task).map_err(|e| WorkerError::Malformed(e.to_string()))?;

        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .env("STRATA_UNIT", task.unit.as_str())
            .env("STRATA_PHASE", &task.phase)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::Spawn)?;

        debug!(unit = %task.unit, program = %self.argv[0], "worker process started");

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).await?;
            stdin.shutdown().await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| WorkerError::Timeout {
                secs: self.timeout.as_secs(),
            })??;

        if !output.status.success() {
            return Err(WorkerError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| WorkerError::Malformed(e.to_string()))
    }

    fn name(&self) -> &str {
        &self.argv[0]
    }
}
