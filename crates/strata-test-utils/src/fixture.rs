use crate::vcs::InMemoryVcs;
use crate::worker::ScriptedWorker;
use std::sync::Arc;
use strata_artifact::{tag_set, Hypothesis, Location, Origin, Severity, Tag};
use strata_core::{Orchestrator, RunDir, StrataConfig, Workspace};
use strata_dispatch::RetryPolicy;
use tempfile::TempDir;

/// Configuration for tests: no retry backoff, two attempts per unit
pub fn test_config() -> StrataConfig {
    StrataConfig::new().with_retry(RetryPolicy {
        max_attempts: 2,
        backoff_ms: 0,
    })
}

/// Novel hypothesis bound to a focus area
pub fn hypothesis(focus: &str, condition: &str, file: &str, severity: Severity) -> Hypothesis {
    Hypothesis::new(Origin::Novel, condition, format!("{condition} in {file}"), Location::file(file))
        .with_severity(severity)
        .with_requires(tag_set([Tag::focus(focus).as_str()]))
}

/// Temporary repository with an in-memory VCS and a scripted worker
///
/// Every call to [`Harness::orchestrator`] builds a fresh orchestrator over
/// the same state directory, as a new process invocation would.
pub struct Harness {
    pub dir: TempDir,
    pub vcs: Arc<InMemoryVcs>,
    pub worker: Arc<ScriptedWorker>,
    pub config: StrataConfig,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
            vcs: Arc::new(InMemoryVcs::new()),
            worker: Arc::new(ScriptedWorker::new()),
            config: test_config(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: StrataConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::new(self.dir.path())
    }

    pub fn current(&self) -> RunDir {
        self.workspace().current()
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.config.clone(),
            self.workspace(),
            self.vcs.clone(),
            self.worker.clone(),
        )
        .expect("valid test configuration")
    }
}
