mod cli;
mod mcp;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the MCP protocol, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api_indexer=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let config = cli::load_config(&cli.config)?;

    match cli.command {
        Commands::Index { repository, all } => {
            cli::index(config, repository.as_deref(), all).await?;
        }
        Commands::Serve => {
            cli::serve(config).await?;
        }
        Commands::Modules { repository, page, format } => {
            cli::modules(config, repository.as_deref(), page, &format).await?;
        }
        Commands::Inspect { fqn, repository, format } => {
            cli::inspect(config, repository.as_deref(), &fqn, &format).await?;
        }
        Commands::Source { fqn, repository } => {
            cli::source(config, repository.as_deref(), &fqn).await?;
        }
        Commands::Search {
            queries,
            repository,
            limit,
            format,
        } => {
            cli::search(config, repository.as_deref(), &queries, limit, &format).await?;
        }
    }

    Ok(())
}
