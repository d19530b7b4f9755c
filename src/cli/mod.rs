//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    FixCommand, HistoryCommand, ReviseCommand, RunCommand, SeedCommand, ShowCommand,
    ValidateCommand,
};
use std::ffi::OsString;

/// Self-repairing agent pipeline
#[derive(Debug, Parser, Clone)]
#[command(name = "autofix")]
#[command(version)]
#[command(about = "Run agent steps in order, rewriting a failing step's prompt and retrying", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// Set a step's initial prompt
    Seed(SeedCommand),

    /// Print a step's current prompt
    Show(ShowCommand),

    /// Show the revision log
    History(HistoryCommand),

    /// Commit a manual revision
    Revise(ReviseCommand),

    /// Ask the corrector to fix a step's prompt outside a run
    Fix(FixCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
