use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scrape every subunit and write checkpoint, diagnostics and report.
    Run(RunArgs),
    /// Resolve collection roots only.
    Resolve(ResolveArgs),
    /// Print the report of an earlier run.
    Report(ReportArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Run configuration (YAML).
    #[arg(long)]
    pub config: String,

    /// Output directory (must not exist).
    #[arg(long)]
    pub out: String,

    /// Checkpoint whose resolved roots replace discovery.
    #[arg(long)]
    pub checkpoint: Option<String>,

    /// Subunits traversed at once; overrides the config.
    #[arg(long)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Run configuration (YAML).
    #[arg(long)]
    pub config: String,

    /// Checkpoint JSON to write (must not exist).
    #[arg(long)]
    pub out: String,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Checkpoint JSON written by `run` or `resolve`.
    #[arg(long)]
    pub checkpoint: String,

    /// Run configuration supplying subunit order and report phrases.
    #[arg(long)]
    pub config: Option<String>,
}
