//! Runtime for `ctdbc`, a small command-line client for the local ctdb
//! daemon.
//!
//! Leading configuration flags are split off and resolved through
//! `ctdb_config`; the rest of the arguments select one command, which runs
//! over the blocking API of `ctdb_client`.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ctdb_client::{Connection, TracingLogger};

mod cli;
mod commands;
mod config;
mod errors;
mod telemetry;

use cli::Cli;
use config::{ConfigLoader, OrthoConfigLoader, command_arguments, split_config_arguments};
use errors::AppError;

/// Runs `ctdbc` with the given arguments, writing results to `stdout` and
/// diagnostics to `stderr`.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    run_with_loader(args, stdout, stderr, &OrthoConfigLoader)
}

fn run_with_loader<I, W, E, L>(args: I, stdout: &mut W, stderr: &mut E, loader: &L) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
    L: ConfigLoader,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let split = split_config_arguments(&args);
    let cli = match Cli::try_parse_from(command_arguments(&args, &split)) {
        Ok(cli) => cli,
        Err(error) if !error.use_stderr() => {
            let _ = write!(stdout, "{error}");
            return ExitCode::SUCCESS;
        }
        Err(error) => {
            let _ = write!(stderr, "{error}");
            return ExitCode::FAILURE;
        }
    };

    let result = loader
        .load(&split.config_arguments)
        .and_then(|config| execute(&cli, &config, stdout));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(stderr, "ctdbc: {error}");
            ExitCode::FAILURE
        }
    }
}

fn execute<W: Write>(
    cli: &Cli,
    config: &ctdb_config::Config,
    stdout: &mut W,
) -> Result<(), AppError> {
    telemetry::initialise(config)?;
    let mut conn = Connection::connect(
        Some(config.daemon_socket()),
        Arc::new(TracingLogger::new()),
    )?;
    let outcome = commands::execute(&cli.command, &mut conn, stdout);
    conn.disconnect();
    outcome
}
