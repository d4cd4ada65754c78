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
    docrag::logging::init().context("init logging")?;

    let cli = docrag::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        docrag::cli::Command::Insert(args) => {
            docrag::insert::run(args).await.context("insert")?;
        }
        docrag::cli::Command::Serve(args) => {
            docrag::serve::run(args).await.context("serve")?;
        }
        docrag::cli::Command::Query(args) => {
            docrag::client::run(args).await.context("query")?;
        }
    }

    Ok(())
}
