//! Command-line definition

use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

fn reference_arg() -> Arg {
    Arg::new("ref")
        .long("ref")
        .default_value("HEAD")
        .help("Codebase reference to analyze")
}

/// The `strata` command
#[must_use]
pub fn build_cli() -> Command {
    Command::new("strata")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Incremental, multi-run analysis orchestrator")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("repo")
                .long("repo")
                .global(true)
                .default_value(".")
                .value_parser(value_parser!(PathBuf))
                .help("Repository root"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file (default: <repo>/strata.toml)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Log level for strata crates"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .conflicts_with("quiet")
                .help("Debug logging"),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Errors only"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Log output format"),
        )
        .subcommand(
            Command::new("scan")
                .about("Start a run: archive, delta, handover, then index focus areas")
                .arg(reference_arg()),
        )
        .subcommand(Command::new("analyze").about("Analyze changed code and verify unchanged conclusions"))
        .subcommand(Command::new("synthesize").about("Propose hypotheses per focus area"))
        .subcommand(Command::new("investigate").about("Investigate hypotheses"))
        .subcommand(Command::new("report").about("Classify findings across runs and write the report"))
        .subcommand(
            Command::new("run")
                .about("Run every remaining phase")
                .arg(reference_arg()),
        )
        .subcommand(
            Command::new("status")
                .about("Show the active run, lineage and history without changing state")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}
