use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    unitmetrics::logging::init().context("init logging")?;

    let cli = unitmetrics::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        unitmetrics::cli::Command::Run(args) => {
            unitmetrics::scrape::run(args).await.context("run")?;
        }
        unitmetrics::cli::Command::Resolve(args) => {
            unitmetrics::resolve::run(args).await.context("resolve")?;
        }
        unitmetrics::cli::Command::Report(args) => {
            unitmetrics::report::run(args).await.context("report")?;
        }
    }

    Ok(())
}
