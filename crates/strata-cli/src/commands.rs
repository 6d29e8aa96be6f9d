//! Subcommand handlers
//!
//! Results go to the given writer (stdout in the binary). Exit codes:
//! [`EXIT_OK`] when every attempted phase completed, [`EXIT_DEGRADED`] when a
//! phase degraded or failed, [`EXIT_STRUCTURAL`] for configuration and
//! structural errors an operator must fix before re-running.

use anyhow::Context;
use clap::ArgMatches;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strata_core::{
    ConfigError, HandoverState, Orchestrator, OrchestratorError, Phase, PhaseOutcome, PhaseStatus, RunSummary,
    StatusReport, StrataConfig, Workspace,
};
use strata_delta::GitCli;
use strata_dispatch::CommandWorker;
use strata_ledger::RowState;
use tracing::{debug, info};

pub const EXIT_OK: u8 = 0;
pub const EXIT_DEGRADED: u8 = 1;
pub const EXIT_STRUCTURAL: u8 = 2;

/// Repository root and configuration for one invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub repo: PathBuf,
    pub config: StrataConfig,
}

impl Invocation {
    /// Resolve the repository root and load its configuration
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration cannot be read or is invalid
    pub fn from_matches(matches: &ArgMatches) -> anyhow::Result<Self> {
        let repo = matches
            .get_one::<PathBuf>("repo")
            .cloned()
            .unwrap_or_else(|| PathBuf::from("."));
        let explicit = matches.get_one::<PathBuf>("config").map(PathBuf::as_path);
        let config = StrataConfig::discover(&repo, explicit)?;
        debug!(repo = %repo.display(), "configuration loaded");
        Ok(Self { repo, config })
    }

    /// Workspace under the repository root
    #[must_use]
    pub fn workspace(&self) -> Workspace {
        Workspace::new(&self.repo)
    }

    /// Orchestrator over git and the configured worker command
    ///
    /// # Errors
    /// `ConfigError` if no worker command is configured
    pub fn orchestrator(&self) -> anyhow::Result<Orchestrator> {
        let settings = &self.config.worker;
        if settings.command.is_empty() {
            return Err(ConfigError::Invalid("[worker].command is not set".into()).into());
        }
        let worker = CommandWorker::new(settings.command.clone(), Duration::from_secs(settings.timeout_secs))
            .context("worker command")?;
        let orchestrator = Orchestrator::new(
            self.config.clone(),
            self.workspace(),
            Arc::new(GitCli::new(&self.repo)),
            Arc::new(worker),
        )?;
        Ok(orchestrator)
    }
}

/// Run one subcommand against `orchestrator`
///
/// `status` is handled by [`status`] since it needs no orchestrator.
///
/// # Errors
/// Propagates orchestrator errors; phase degradation is an exit code, not an
/// error
pub async fn execute<W: Write>(
    orchestrator: &Orchestrator,
    command: &str,
    args: &ArgMatches,
    out: &mut W,
) -> anyhow::Result<u8> {
    let outcomes = match command {
        "scan" => {
            let reference = reference(args);
            let scan = orchestrator.scan(&reference).await?;
            let mut outcomes = vec![scan];
            if outcomes[0].is_completed() {
                outcomes.push(orchestrator.run_phase(Phase::Index).await?);
            }
            outcomes
        }
        "run" => {
            let summary = orchestrator.run(&reference(args)).await?;
            write_summary(out, &summary)?;
            return Ok(exit_code(&summary.phases));
        }
        name => {
            let phase: Phase = name.parse()?;
            vec![orchestrator.run_phase(phase).await?]
        }
    };
    for outcome in &outcomes {
        writeln!(out, "{}", render_outcome(outcome))?;
    }
    Ok(exit_code(&outcomes))
}

/// Print the status of the workspace at `workspace`
///
/// # Errors
/// Returns error if the Run Record or history cannot be read
pub fn status<W: Write>(workspace: &Workspace, json: bool, out: &mut W) -> anyhow::Result<u8> {
    let report = StatusReport::collect(workspace)?;
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    } else {
        write!(out, "{}", render_status(&report))?;
    }
    Ok(EXIT_OK)
}

fn reference(args: &ArgMatches) -> String {
    args.get_one::<String>("ref").cloned().unwrap_or_else(|| "HEAD".to_string())
}

/// Exit code for a set of phase outcomes
#[must_use]
pub fn exit_code(outcomes: &[PhaseOutcome]) -> u8 {
    if outcomes.iter().all(PhaseOutcome::is_completed) {
        EXIT_OK
    } else {
        EXIT_DEGRADED
    }
}

/// Exit code for an error that escaped a command
#[must_use]
pub fn exit_code_for(error: &anyhow::Error) -> u8 {
    if error.downcast_ref::<ConfigError>().is_some() {
        return EXIT_STRUCTURAL;
    }
    match error.downcast_ref::<OrchestratorError>() {
        Some(e) if e.is_structural() => EXIT_STRUCTURAL,
        Some(_) => EXIT_DEGRADED,
        None => EXIT_STRUCTURAL,
    }
}

fn write_summary<W: Write>(out: &mut W, summary: &RunSummary) -> std::io::Result<()> {
    for outcome in &summary.phases {
        writeln!(out, "{}", render_outcome(outcome))?;
    }
    let state = if summary.is_clean() {
        "completed"
    } else {
        "stopped"
    };
    info!(run = %summary.run_id, seq = summary.seq, clean = summary.is_clean(), "run finished");
    writeln!(out, "run {} (#{}) {state}", summary.run_id, summary.seq)
}

/// One phase outcome, with degraded units and notes on their own lines
#[must_use]
pub fn render_outcome(outcome: &PhaseOutcome) -> String {
    if outcome.already_completed {
        return format!("{}: already completed", outcome.phase);
    }
    let mut text = format!(
        "{}: {} ({} units, {} reused)",
        outcome.phase, outcome.status, outcome.completed, outcome.skipped
    );
    if let Some(error) = &outcome.error {
        text.push_str(&format!("\n  error: {error}"));
    }
    for unit in &outcome.degraded {
        text.push_str(&format!(
            "\n  degraded {} after {} attempts: {}",
            unit.unit, unit.attempts, unit.error
        ));
    }
    for note in &outcome.notes {
        text.push_str(&format!("\n  note: {note}"));
    }
    text
}

/// Human-readable status
#[must_use]
pub fn render_status(report: &StatusReport) -> String {
    let mut text = String::new();
    match &report.run {
        None => text.push_str("no active run\n"),
        Some(run) => {
            text.push_str(&format!("run {} (#{}) at {}\n", run.run_id, run.seq, run.reference));
            for phase in Phase::ALL {
                let status = run.status(phase);
                let mut line = format!("  {phase:<12} {status}");
                if let Some(state) = run.phase(phase) {
                    if status == PhaseStatus::Degraded {
                        line.push_str(&format!(" ({} degraded units)", state.degraded_units.len()));
                    }
                }
                text.push_str(&line);
                text.push('\n');
            }
            match &run.handover {
                HandoverState::FirstRun => text.push_str("handover: first run\n"),
                HandoverState::Built => text.push_str("handover: built\n"),
                HandoverState::Skipped { reason } => text.push_str(&format!("handover: skipped ({reason})\n")),
            }
            if let Some(back) = &run.back_pointer {
                text.push_str(&format!(
                    "prior: {} (#{}) at {}{}\n",
                    back.prior_run_id,
                    back.prior_seq,
                    back.prior_ref,
                    if back.prior_completed { "" } else { ", incomplete" }
                ));
            }
        }
    }
    if !report.lineage.is_empty() {
        text.push_str("lineage:\n");
        for row in &report.lineage {
            match (row.state, row.counts) {
                (RowState::Closed, Some(c)) => text.push_str(&format!(
                    "  #{:<4} {}  open {} new {} recurrent {} regression {} resolved {}\n",
                    row.seq, row.reference, c.open, c.new, c.recurrent, c.regression, c.resolved
                )),
                _ => text.push_str(&format!("  #{:<4} {}  not reported\n", row.seq, row.reference)),
            }
        }
    }
    text.push_str(&format!("history: {} archived runs\n", report.history.len()));
    for corrupt in &report.corrupt {
        text.push_str(&format!("  corrupt archive {corrupt}\n"));
    }
    text
}

/// Repository root for log messages
#[must_use]
pub fn display_repo(repo: &Path) -> String {
    repo.canonicalize().unwrap_or_else(|_| repo.to_path_buf()).display().to_string()
}
