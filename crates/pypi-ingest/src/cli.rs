//! Command-line interface

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::models::ProcessingStatus;
use crate::scheduler::RunMode;

#[derive(Parser, Debug)]
#[command(name = "pypi-ingest")]
#[command(author, version, about = "Fetch PyPI metadata for queued packages", long_about = None)]
pub struct Cli {
    /// Subcommand to execute; `run` when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    pub fn into_command(self) -> Commands {
        self.command
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Claim and process ready packages
    Run(RunArgs),

    /// Queue package names for processing
    Enqueue {
        /// Package names
        names: Vec<String>,

        /// Read additional names from a file, one per line
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Return failed or stuck packages to ready
    Reset {
        /// Status to reset from (failed or in_progress)
        #[arg(long, default_value = "failed")]
        from: ProcessingStatus,
    },

    /// Show package counts per status
    Status,

    /// Show the stored data of one package
    Show {
        /// Package name
        name: String,
    },

    /// Apply database migrations
    Migrate,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunArgs {
    /// Stop when nothing is ready (drain) or keep polling (daemon)
    #[arg(long)]
    pub mode: Option<RunMode>,

    /// Lower bound of the pause between packages, in seconds
    #[arg(long)]
    pub min_delay: Option<u64>,

    /// Upper bound of the pause between packages, in seconds
    #[arg(long)]
    pub max_delay: Option<u64>,

    /// Apply migrations before starting
    #[arg(long)]
    pub migrate: bool,
}
