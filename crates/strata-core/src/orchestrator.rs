//! Phase Orchestrator
//!
//! Sequences scan → index → analyze → synthesize → investigate → report.
//! Every transition is written to the Run Record before and after the phase
//! body runs, so an interrupted process always leaves a resumable record.
//!
//! # Workflow
//! 1. `scan` archives any prior workspace, computes the delta, builds the
//!    handover and starts the lineage row
//! 2. `index` groups tracked files into focus areas
//! 3. `analyze` dispatches full or incremental analysis plus verification
//! 4. `synthesize` proposes hypotheses and deduplicates them
//! 5. `investigate` turns hypotheses into findings
//! 6. `report` classifies lineage and closes the run

use crate::config::StrataConfig;
use crate::error::OrchestratorError;
use crate::phases::{PhaseOutcome, PhaseWork};
use crate::run::{RunRecord, RunSettingsSnapshot};
use crate::state_machine::{Phase, PhaseStatus};
use crate::workspace::{HandoverSection, RunDir, Workspace};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use strata_delta::VersionControl;
use strata_dispatch::{CostEstimator, LinearEstimator, Planner, PoolStats, Worker, WorkerPool};
use strata_ledger::{lineage_view, ArchiveInfo, ArchiveManifest, LineageRow};
use tracing::{error, info, warn};

/// The orchestrator
///
/// Owns the configuration, the workspace and the dispatch machinery.
pub struct Orchestrator {
    pub(crate) config: StrataConfig,
    pub(crate) workspace: Workspace,
    pub(crate) vcs: Arc<dyn VersionControl>,
    pub(crate) planner: Planner,
    pub(crate) pool: WorkerPool,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workspace", &self.workspace)
            .field("planner", &self.planner)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Outcomes of a multi-phase invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run id
    pub run_id: String,
    /// Sequence number
    pub seq: u64,
    /// One outcome per phase attempted
    pub phases: Vec<PhaseOutcome>,
}

impl RunSummary {
    /// True if every attempted phase completed
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.phases.iter().all(|p| p.status == PhaseStatus::Completed)
    }

    /// True if the terminal phase completed
    #[must_use]
    pub fn reached_report(&self) -> bool {
        self.phases
            .iter()
            .any(|p| p.phase == Phase::Report && p.status == PhaseStatus::Completed)
    }
}

/// Read-only view for status tooling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Active run, if any
    pub run: Option<RunRecord>,
    /// Lineage table (handover section, else the active ledger)
    pub lineage: Vec<LineageRow>,
    /// Verified archives, oldest first
    pub history: Vec<ArchiveManifest>,
    /// Unusable archives as `key: reason`
    pub corrupt: Vec<String>,
}

impl StatusReport {
    /// Gather status from the workspace without mutating it
    ///
    /// # Errors
    /// Returns error if the history store cannot be listed or the Run Record
    /// cannot be read
    pub fn collect(workspace: &Workspace) -> Result<Self, OrchestratorError> {
        let current = workspace.current();
        let run = current.load_run()?;
        let lineage = match current.handover_section::<Vec<LineageRow>>(HandoverSection::Lineage)? {
            Some(rows) => rows,
            None => current
                .lineage_chain()
                .map(|chain| lineage_view(&chain))
                .unwrap_or_default(),
        };
        let history = workspace.archives().scan()?;
        Ok(Self {
            run,
            lineage,
            history: history.valid.into_iter().map(|e| e.manifest).collect(),
            corrupt: history
                .corrupt
                .into_iter()
                .map(|c| format!("{}: {}", c.key, c.reason))
                .collect(),
        })
    }
}

impl Orchestrator {
    /// Create new orchestrator
    ///
    /// # Errors
    /// Returns `OrchestratorError::Config` if the configuration is invalid
    pub fn new(
        config: StrataConfig,
        workspace: Workspace,
        vcs: Arc<dyn VersionControl>,
        worker: Arc<dyn Worker>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let estimator = Arc::new(LinearEstimator::from(&config.budget));
        Ok(Self {
            planner: Planner::new(estimator, config.budget),
            pool: WorkerPool::new(worker, config.retry),
            config,
            workspace,
            vcs,
        })
    }

    /// Replace the cost estimation strategy
    #[must_use]
    pub fn with_estimator(mut self, estimator: Arc<dyn CostEstimator>) -> Self {
        self.planner = Planner::new(estimator, self.config.budget);
        self
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    /// Workspace
    #[inline]
    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Worker pool counters
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Start a run at `reference`, or resume an unfinished scan of it
    ///
    /// A completed or abandoned active run is archived first.
    ///
    /// # Errors
    /// - `OrchestratorError::Vcs` if `reference` cannot be resolved
    /// - `OrchestratorError::Archive` / `Ledger` if the workspace cannot be
    ///   archived or the new Run Record cannot be written
    pub async fn scan(&self, reference: &str) -> Result<PhaseOutcome, OrchestratorError> {
        let resolved = self.vcs.resolve(reference)?;
        let current = self.workspace.current();

        let resumable = match current.load_run() {
            Ok(Some(run)) if run.status(Phase::Scan) != PhaseStatus::Completed && run.reference == resolved => {
                info!(run = %run.run_id, seq = run.seq, "resuming unfinished scan");
                Some(run)
            }
            Ok(Some(run)) => {
                self.archive_active(Some(&run))?;
                None
            }
            Ok(None) if current.exists() => {
                warn!(path = %current.path().display(), "workspace without run record; archiving");
                self.archive_active(None)?;
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "unreadable run record; archiving workspace");
                self.archive_active(None)?;
                None
            }
        };

        let run = match resumable {
            Some(run) => run,
            None => {
                let history = self.workspace.archives().scan()?;
                let seq = history.valid.iter().map(|e| e.manifest.info.seq).max().unwrap_or(0) + 1;
                let run = RunRecord::new(seq, resolved, RunSettingsSnapshot::from(&self.config));
                current.save_run(&run)?;
                info!(run = %run.run_id, seq, reference = %run.reference, "run created");
                run
            }
        };
        self.execute(Phase::Scan, run).await
    }

    /// Run one phase of the active run
    ///
    /// A completed phase is not re-run. `Phase::Scan` resumes an unfinished
    /// scan; use [`Orchestrator::scan`] to start a new run.
    ///
    /// # Errors
    /// - `OrchestratorError::NoActiveRun` if there is no active run
    /// - `OrchestratorError::StateMachine` if the predecessor has not completed
    pub async fn run_phase(&self, phase: Phase) -> Result<PhaseOutcome, OrchestratorError> {
        let run = self.workspace.current().load_run()?.ok_or(OrchestratorError::NoActiveRun)?;
        if run.status(phase) == PhaseStatus::Completed {
            info!(run = %run.run_id, phase = %phase, "phase already completed");
            return Ok(PhaseOutcome::already_completed(phase));
        }
        if phase == Phase::Scan {
            let reference = run.reference.clone();
            return self.scan(&reference).await;
        }
        self.execute(phase, run).await
    }

    /// Run every remaining phase, stopping at the first that does not complete
    ///
    /// An incomplete active run at the same reference whose scan completed is
    /// resumed; otherwise a new run is started.
    ///
    /// # Errors
    /// Same as [`Orchestrator::scan`] and [`Orchestrator::run_phase`]
    pub async fn run(&self, reference: &str) -> Result<RunSummary, OrchestratorError> {
        let resolved = self.vcs.resolve(reference)?;
        let active = self.workspace.current().load_run().ok().flatten();
        let resume = active.as_ref().is_some_and(|r| {
            !r.is_complete() && r.reference == resolved && r.status(Phase::Scan) == PhaseStatus::Completed
        });

        let mut summary = RunSummary::default();
        if !resume {
            let outcome = self.scan(reference).await?;
            let stop = outcome.status != PhaseStatus::Completed;
            summary.phases.push(outcome);
            if stop {
                return self.summarize(summary);
            }
        }

        for phase in Phase::ALL.into_iter().skip(1) {
            let outcome = self.run_phase(phase).await?;
            let stop = outcome.status != PhaseStatus::Completed;
            summary.phases.push(outcome);
            if stop {
                break;
            }
        }
        self.summarize(summary)
    }

    /// Read-only status
    ///
    /// # Errors
    /// Same as [`StatusReport::collect`]
    pub fn status(&self) -> Result<StatusReport, OrchestratorError> {
        StatusReport::collect(&self.workspace)
    }

    pub(crate) fn current(&self) -> RunDir {
        self.workspace.current()
    }

    fn summarize(&self, mut summary: RunSummary) -> Result<RunSummary, OrchestratorError> {
        if let Some(run) = self.current().load_run()? {
            summary.run_id = run.run_id;
            summary.seq = run.seq;
        }
        Ok(summary)
    }

    fn archive_active(&self, run: Option<&RunRecord>) -> Result<(), OrchestratorError> {
        let info = match run {
            Some(run) => ArchiveInfo {
                run_id: run.run_id.clone(),
                seq: run.seq,
                reference: run.reference.clone(),
                completed: run.is_complete(),
                phase_reached: run.phase_reached().map_or("none", Phase::name).to_string(),
            },
            None => ArchiveInfo {
                run_id: "unknown".into(),
                seq: 0,
                reference: "unknown".into(),
                completed: false,
                phase_reached: "none".into(),
            },
        };
        let entry = self.workspace.archive_current(info)?;
        if !entry.manifest.info.completed {
            warn!(key = %entry.key(), run = %entry.manifest.info.run_id, "archived an incomplete run");
        }
        Ok(())
    }

    /// Transition into the phase, run its body, record the result
    async fn execute(&self, phase: Phase, mut run: RunRecord) -> Result<PhaseOutcome, OrchestratorError> {
        let current = self.current();
        run.begin(phase)?;
        current.save_run(&run)?;
        info!(run = %run.run_id, seq = run.seq, phase = %phase, "phase started");

        let result = match phase {
            Phase::Scan => self.scan_phase(&mut run).await,
            Phase::Index => self.index_phase(&run),
            Phase::Analyze => self.analyze_phase(&run).await,
            Phase::Synthesize => self.synthesize_phase(&run).await,
            Phase::Investigate => self.investigate_phase(&run).await,
            Phase::Report => self.report_phase(&run),
        };

        let (work, failure) = match result {
            Ok(work) => (work, None),
            Err(e) => {
                error!(run = %run.run_id, phase = %phase, error = %e, "phase failed");
                (PhaseWork::default(), Some(e.to_string()))
            }
        };
        for note in &work.notes {
            run.note(phase, note.clone());
        }
        let status = run.finish(phase, work.completed, work.degraded.clone(), failure.clone())?;
        current.save_run(&run)?;

        match status {
            PhaseStatus::Completed => info!(run = %run.run_id, phase = %phase, units = work.completed, "phase completed"),
            _ => warn!(
                run = %run.run_id,
                phase = %phase,
                degraded = work.degraded.len(),
                error = failure.as_deref().unwrap_or(""),
                "phase degraded"
            ),
        }
        Ok(PhaseOutcome {
            phase,
            status,
            completed: work.completed,
            skipped: work.skipped,
            degraded: work.degraded,
            error: failure,
            notes: work.notes,
            already_completed: false,
        })
    }
}
