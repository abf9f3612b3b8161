//! Entry point for `ctdbc`, a command-line client for the local ctdb daemon.
//!
//! All work is delegated to [`ctdb_cli::run`].

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    ctdb_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
