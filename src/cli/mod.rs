//! CLI module for nestquery
//!
//! Provides command-line interface for:
//! - explain: compile a query and print the root level's plan
//! - run: execute a query against a JSON data fixture

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, RequestArgs};
pub use commands::{execute, explain, prepare, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_request, write_error, write_response};

/// Parses arguments, runs the command and reports failures on stdout
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    match run_command(cli.command) {
        Ok(()) => Ok(()),
        Err(err) => {
            write_error(err.code_str(), err.message())?;
            Err(err)
        }
    }
}
