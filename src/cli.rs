use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "reportflow", version, about = "Recurring report scheduler worker")]
pub struct Cli {
    /// Path to a single configuration file (bypasses layered loading)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply pending migrations and start the polling worker
    Worker,
    /// Apply pending database migrations and exit
    Migrate,
}
