use std::env;
use std::io::Write;
use std::process::ExitCode;
use strata_cli::commands::display_repo;
use strata_cli::{build_cli, execute, exit_code_for, init_logging, status, Invocation, LogOptions, LOG_ENV};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let matches = build_cli().get_matches();
    let options = LogOptions::from_matches(&matches, env::var(LOG_ENV).ok().as_deref());
    if let Err(e) = init_logging(&options) {
        eprintln!("logging disabled: {e}");
    }

    let result = async {
        let invocation = Invocation::from_matches(&matches)?;
        info!(repo = %display_repo(&invocation.repo), "strata {}", env!("CARGO_PKG_VERSION"));
        let mut stdout = std::io::stdout().lock();
        let code = match matches.subcommand() {
            Some(("status", args)) => status(&invocation.workspace(), args.get_flag("json"), &mut stdout)?,
            Some((name, args)) => {
                let orchestrator = invocation.orchestrator()?;
                execute(&orchestrator, name, args, &mut stdout).await?
            }
            None => anyhow::bail!("no command given"),
        };
        stdout.flush()?;
        anyhow::Ok(code)
    }
    .await;

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}
