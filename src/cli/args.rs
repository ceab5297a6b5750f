//! CLI argument definitions using clap
//!
//! Commands:
//! - nestquery explain --schema <path> --collection <name> [--query <path>]
//! - nestquery run --schema <path> --collection <name> --data <path> [--query <path>]

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// nestquery - permission-aware nested relational queries
#[derive(Parser, Debug)]
#[command(name = "nestquery")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Inputs shared by every command
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Schema overview JSON
    #[arg(long)]
    pub schema: PathBuf,

    /// Root collection
    #[arg(long)]
    pub collection: String,

    /// Query JSON; read from stdin when omitted
    #[arg(long)]
    pub query: Option<PathBuf>,

    /// Permission rules JSON (array); admin access when omitted
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Accountability JSON; defaults to admin without rules, public with them
    #[arg(long)]
    pub accountability: Option<PathBuf>,

    /// Engine configuration JSON; environment variables when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile the root level and print its plan
    Explain {
        #[command(flatten)]
        request: RequestArgs,
    },

    /// Execute a query against a JSON data fixture
    Run {
        #[command(flatten)]
        request: RequestArgs,

        /// Data JSON: `{ "<collection>": [rows...] }`
        #[arg(long)]
        data: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
