use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::replace::ReplaceStrategy;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Refresh live-connected spreadsheet reports and mirror them into PostgreSQL",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Stage, refresh, and load every report described by a config file
    Run(RunArgs),
    /// Show the table, columns, and load statements derived from one report
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// YAML config file with directories, refresh command, and database settings
    #[arg(short, long)]
    pub config: PathBuf,
    /// Load staged files as-is without invoking the refresh command
    #[arg(long = "skip-refresh")]
    pub skip_refresh: bool,
    /// Override the configured table replacement strategy
    #[arg(long, value_enum)]
    pub strategy: Option<ReplaceStrategy>,
    /// Abort the run at the first report that fails
    #[arg(long = "fail-fast")]
    pub fail_fast: bool,
    /// Also write the run summary as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Report file to inspect (spreadsheet or delimited export)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Replacement strategy whose statements should be listed
    #[arg(long, value_enum, default_value = "drop-create")]
    pub strategy: ReplaceStrategy,
    /// Number of data rows to preview under the sanitized header (0 disables)
    #[arg(long, default_value_t = 5)]
    pub preview: usize,
}
