use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;

use tocscan::cli::{Cli, Command, SourceCommand};
use tocscan::commands;
use tocscan::config::{FetchConfig, resolve_data_dir};
use tocscan::fetch::HttpListingFetcher;
use tocscan::orchestrator::ScanOrchestrator;
use tocscan::store::LocalFsScanStore;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tocscan::logging::init(cli.verbose).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    let data_dir = resolve_data_dir(cli.data_dir.clone());
    let fetch_config = FetchConfig::from_env().context("load fetch config")?;
    tracing::debug!(data_dir = %data_dir.display(), ?fetch_config, "resolved config");

    let fetcher = HttpListingFetcher::new(&fetch_config).context("build http fetcher")?;
    let orchestrator = ScanOrchestrator::new(
        Arc::new(fetcher),
        Arc::new(LocalFsScanStore::new(data_dir)),
    );

    match cli.command {
        Command::Source {
            command: SourceCommand::Add(args),
        } => commands::source_add(&orchestrator, args)
            .await
            .context("source add")?,
        Command::Source {
            command: SourceCommand::List,
        } => commands::source_list(&orchestrator)
            .await
            .context("source list")?,
        Command::Scan(args) => commands::scan(&orchestrator, args).await.context("scan")?,
        Command::Status(args) => commands::status(&orchestrator, args)
            .await
            .context("status")?,
        Command::Chapters(args) => commands::chapters(&orchestrator, args)
            .await
            .context("chapters")?,
        Command::History(args) => commands::history(&orchestrator, args)
            .await
            .context("history")?,
        Command::Changes(args) => commands::changes(&orchestrator, args)
            .await
            .context("changes")?,
    }

    Ok(())
}
