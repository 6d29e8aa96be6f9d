//! Tracing subscriber setup
//!
//! Level precedence: `--log-level`, then `--verbose` / `--quiet`, then the
//! `STRATA_LOG` environment variable, then `info`. A set `RUST_LOG` replaces
//! the computed filter entirely. Logs go to stderr.

use clap::ArgMatches;
use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the default level
pub const LOG_ENV: &str = "STRATA_LOG";

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Resolved logging options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub level: Level,
    pub format: LogFormat,
}

impl LogOptions {
    /// Options from parsed arguments and the environment value of [`LOG_ENV`]
    #[must_use]
    pub fn from_matches(matches: &ArgMatches, env_level: Option<&str>) -> Self {
        let level = if let Some(level) = matches.get_one::<String>("log-level") {
            parse_level(level)
        } else if matches.get_flag("verbose") {
            Level::DEBUG
        } else if matches.get_flag("quiet") {
            Level::ERROR
        } else {
            env_level.map_or(Level::INFO, parse_level)
        };
        let format = match matches.get_one::<String>("log-format").map(String::as_str) {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        Self { level, format }
    }

    /// Filter directives for the strata crates
    #[must_use]
    pub fn directives(&self) -> String {
        let level = self.level.as_str().to_lowercase();
        ["strata", "strata_core", "strata_delta", "strata_dispatch", "strata_ledger", "strata_cli"]
            .iter()
            .map(|target| format!("{target}={level}"))
            .chain(std::iter::once("warn".to_string()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install the global subscriber
///
/// # Errors
/// Returns error if a subscriber is already installed
pub fn init_logging(options: &LogOptions) -> anyhow::Result<()> {
    let filter = match env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::try_new(options.directives())?,
    };
    let registry = tracing_subscriber::registry().with(filter);
    match options.format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::build_cli;

    fn options(args: &[&str], env_level: Option<&str>) -> LogOptions {
        let matches = build_cli().try_get_matches_from(args).unwrap();
        LogOptions::from_matches(&matches, env_level)
    }

    #[test]
    fn flag_beats_environment() {
        let opts = options(&["strata", "status", "--log-level", "warn"], Some("trace"));
        assert_eq!(opts.level, Level::WARN);
        assert_eq!(options(&["strata", "status", "-v"], Some("error")).level, Level::DEBUG);
        assert_eq!(options(&["strata", "status", "-q"], None).level, Level::ERROR);
    }

    #[test]
    fn environment_then_default() {
        assert_eq!(options(&["strata", "status"], Some("trace")).level, Level::TRACE);
        assert_eq!(options(&["strata", "status"], Some("bogus")).level, Level::INFO);
        assert_eq!(options(&["strata", "status"], None).level, Level::INFO);
    }

    #[test]
    fn directives_cover_workspace_crates() {
        let opts = options(&["strata", "status", "--log-format", "json"], Some("debug"));
        assert_eq!(opts.format, LogFormat::Json);
        let directives = opts.directives();
        assert!(directives.contains("strata_core=debug"));
        assert!(directives.ends_with(",warn"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
