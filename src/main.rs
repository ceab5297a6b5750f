//! nestquery CLI entry point
//!
//! Installs the log subscriber, then delegates everything to the CLI
//! module. Errors go to stderr and exit non-zero.

use nestquery::{cli, observability};

fn main() {
    observability::init_tracing();

    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
