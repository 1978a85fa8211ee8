use anyhow::{Context, Result};
use start_test_core::{exit_code, Environment, Error, Session};
use std::env;
use tracing::{debug, info};

use crate::cli::Cli;

pub fn run_command(cli: Cli) -> Result<i32> {
    let cwd = env::current_dir().context("Failed to determine the current directory")?;
    let (settings, targets) = cli.into_settings();

    debug!("Running from {} with targets {:?}", cwd.display(), targets);

    let session = Session::new(settings, Environment::from_process(), &cwd)
        .context("Failed to set up the test session")?;
    let outcome = session.run(&targets)?;

    info!(
        "Session finished with exit code {} (log: {})",
        outcome.exit_code,
        outcome.log_file.display()
    );
    Ok(outcome.exit_code)
}

/// Exit code for an error that ended the session early. Missing
/// prerequisites are reported as they were detected, on stdout.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<Error>() {
        Some(Error::EnvironmentError(msg)) => {
            println!("{msg}");
            exit_code::ENVIRONMENT
        }
        _ => {
            eprintln!("Error: {err:#}");
            exit_code::FAILURES
        }
    }
}
