use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ireader_sources::app::AppContext;
use ireader_sources::cli::{commands, Cli, Commands};
use ireader_sources::config::Config;
use ireader_sources::daemon::{Daemon, DaemonConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    let ctx = AppContext::new(config)?;
    let listener = ctx.load_sources().await?;

    match cli.command {
        Commands::Sources => {
            commands::list_sources(&ctx)?;
        }
        Commands::Remote { force } => {
            commands::list_remote(&ctx, force).await?;
        }
        Commands::Install { pkg } => {
            commands::install(&ctx, &pkg).await?;
        }
        Commands::Uninstall { pkg } => {
            commands::uninstall(&ctx, &pkg).await?;
        }
        Commands::Search { source_id, query, page } => {
            commands::search(&ctx, source_id, &query, page).await?;
        }
        Commands::Popular { source_id, page, all } => {
            commands::popular(&ctx, source_id, page, all).await?;
        }
        Commands::Latest { source_id, page } => {
            commands::latest(&ctx, source_id, page).await?;
        }
        Commands::Details { source_id, url } => {
            commands::details(&ctx, source_id, &url).await?;
        }
        Commands::Chapters { source_id, url } => {
            commands::chapters(&ctx, source_id, &url).await?;
        }
        Commands::Read { source_id, url } => {
            commands::read(&ctx, source_id, &url).await?;
        }
        Commands::Download { source_id, book_url } => {
            commands::download(&ctx, source_id, &book_url).await?;
        }
        Commands::Import { file } => {
            commands::import_sources(&ctx, &file)?;
        }
        Commands::Export { source_id, file } => {
            commands::export_source(&ctx, source_id, file.as_deref())?;
        }
        Commands::Templates => {
            commands::list_templates(&ctx)?;
        }
        Commands::NewSource { template, name, base_url, lang } => {
            commands::new_source(&ctx, &template, &name, &base_url, lang.as_deref())?;
        }
        Commands::Daemon { interval, no_initial_sync } => {
            let config = DaemonConfig {
                sync_interval_secs: DaemonConfig::parse_interval(&interval).map_err(anyhow::Error::msg)?,
                sync_on_start: !no_initial_sync,
            };
            Daemon::new(Arc::new(ctx), config).run().await?;
        }
    }

    listener.abort();
    Ok(())
}
