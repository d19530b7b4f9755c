//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,

    /// Override the attempt bound for every step
    #[arg(long)]
    pub max_retries: Option<usize>,

    /// Write the final state as JSON
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Set a step's initial prompt
#[derive(Debug, Args, Clone)]
pub struct SeedCommand {
    #[arg(short, long)]
    pub file: String,

    #[arg(long)]
    pub step: String,

    /// File holding the prompt text
    #[arg(long = "from")]
    pub from: PathBuf,
}

/// Print a step's current prompt
#[derive(Debug, Args, Clone)]
pub struct ShowCommand {
    #[arg(short, long)]
    pub file: String,

    #[arg(long)]
    pub step: String,
}

/// Show the revision log
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    #[arg(short, long)]
    pub file: String,

    /// Only show revisions of this step
    #[arg(long)]
    pub step: Option<String>,

    /// Number of recent revisions to show
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Commit a manual revision
#[derive(Debug, Args, Clone)]
pub struct ReviseCommand {
    #[arg(short, long)]
    pub file: String,

    #[arg(long)]
    pub step: String,

    /// File holding the new prompt text
    #[arg(long = "from")]
    pub from: PathBuf,

    /// Evaluation score to record with the revision
    #[arg(long)]
    pub score: Option<f64>,
}

/// Ask the corrector for a new prompt
#[derive(Debug, Args, Clone)]
pub struct FixCommand {
    #[arg(short, long)]
    pub file: String,

    #[arg(long)]
    pub step: String,

    /// Error message the step produced
    #[arg(long)]
    pub error: String,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
