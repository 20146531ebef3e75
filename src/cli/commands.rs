use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use api_indexer::config::{AppConfig, DEFAULT_CONFIG_FILE};
use api_indexer::indexer::IndexPipeline;
use api_indexer::server::{QueryServer, SourceLookup, SymbolLookup};

#[derive(Parser)]
#[command(name = "api-indexer")]
#[command(about = "Ranked, searchable index of a Python library's public API")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Build the index for the only configured repository
    api-indexer index

    # Build every configured repository concurrently
    api-indexer index --all

    # First page of ranked targets
    api-indexer modules --page 1

    # Inspect a symbol and read its source
    api-indexer inspect google.adk.agents.Agent
    api-indexer source google.adk.agents.Agent.run

    # Search with several sub-queries
    api-indexer search "tool config" "function tool"

    # Start MCP server on stdio
    api-indexer serve
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and store the index for a repository
    Index {
        /// Repository name (optional when only one is configured)
        repository: Option<String>,

        /// Build every configured repository
        #[arg(long, conflicts_with = "repository")]
        all: bool,
    },

    /// Start MCP server
    Serve,

    /// List ranked targets, one page at a time
    Modules {
        #[arg(long)]
        repository: Option<String>,

        /// 1-indexed page number
        #[arg(long, default_value = "1")]
        page: usize,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Show the full specification of a symbol
    Inspect {
        /// Fully-qualified name
        fqn: String,

        #[arg(long)]
        repository: Option<String>,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Print the source code of a symbol from the checkout
    Source {
        /// Fully-qualified name
        fqn: String,

        #[arg(long)]
        repository: Option<String>,
    },

    /// Search the index
    Search {
        /// One or more queries; scores are combined across them
        #[arg(required = true)]
        queries: Vec<String>,

        #[arg(long)]
        repository: Option<String>,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

pub fn load_config(path: &Path) -> anyhow::Result<Arc<AppConfig>> {
    let config = AppConfig::load(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    Ok(Arc::new(config))
}

fn is_json(format: &str) -> bool {
    format.eq_ignore_ascii_case("json")
}

pub async fn index(config: Arc<AppConfig>, repository: Option<&str>, all: bool) -> anyhow::Result<()> {
    let pipeline = IndexPipeline::new(config.clone());

    if all {
        let results = pipeline.build_all().await;
        let mut failed = 0;
        for (name, result) in results {
            match result {
                Ok(outcome) => println!(
                    "{}: {} targets -> {}",
                    name,
                    outcome.stats.targets,
                    outcome.path.display()
                ),
                Err(e) => {
                    failed += 1;
                    eprintln!("{}: failed: {}", name, e);
                }
            }
        }
        if failed > 0 {
            bail!("{} repositories failed to index", failed);
        }
        return Ok(());
    }

    let repository = config.select_repository(repository)?;
    let outcome = pipeline.build(repository).await?;
    let stats = &outcome.stats;

    println!("Indexed {}@{}", repository.name, repository.version);
    println!("  Files scanned:     {}", stats.files_scanned);
    println!("  Parse failures:    {}", stats.parse_failures);
    println!("  Entities:          {}", stats.entities);
    println!("  Unresolved bases:  {}", stats.unresolved_bases);
    println!("  Files mined:       {}", stats.files_mined);
    println!("  Associations:      {}", stats.associations);
    println!("  Ranked targets:    {}", stats.targets);
    println!("  Time:              {:.1}s", outcome.elapsed.as_secs_f64());
    println!("  Artifact:          {}", outcome.path.display());
    Ok(())
}

pub async fn serve(config: Arc<AppConfig>) -> anyhow::Result<()> {
    use crate::mcp::McpServer;
    use rmcp::transport::stdio;
    use rmcp::ServiceExt;

    let server = Arc::new(QueryServer::new(config));
    // Resolution failures are fatal at startup rather than on the first call
    server.preload().await?;

    let service = McpServer::new(server)
        .serve(stdio())
        .await
        .map_err(|e| api_indexer::IndexerError::Mcp(e.to_string()))?;
    service
        .waiting()
        .await
        .map_err(|e| api_indexer::IndexerError::Mcp(e.to_string()))?;

    Ok(())
}

pub async fn modules(
    config: Arc<AppConfig>,
    repository: Option<&str>,
    page: usize,
    format: &str,
) -> anyhow::Result<()> {
    let server = QueryServer::new(config);
    let page = server.list_modules(repository, page).await?;

    if is_json(format) {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    println!(
        "{}@{} - page {} of {} ({} targets)",
        page.repository, page.version, page.page, page.total_pages, page.total_targets
    );
    if page.items.is_empty() {
        println!("  (no entries on this page)");
    }
    for item in &page.items {
        println!(
            "  {:>4}. {} [{}] score={:.3}",
            item.rank,
            item.fqn,
            item.kind.as_str(),
            item.score
        );
        if let Some(summary) = &item.summary {
            println!("        {}", summary);
        }
    }
    Ok(())
}

pub async fn inspect(
    config: Arc<AppConfig>,
    repository: Option<&str>,
    fqn: &str,
    format: &str,
) -> anyhow::Result<()> {
    let server = QueryServer::new(config);
    let lookup = server.inspect_symbol(repository, fqn).await?;

    if is_json(format) {
        println!("{}", serde_json::to_string_pretty(&lookup)?);
        return Ok(());
    }

    match lookup {
        SymbolLookup::Found(spec) => {
            println!("{} [{}]", spec.fqn, spec.kind.as_str());
            if let Some(signature) = &spec.signature {
                println!("  {}", signature);
            }
            println!(
                "  {}:{}-{}",
                spec.location.file_path, spec.location.start_line, spec.location.end_line
            );
            if !spec.bases.is_empty() {
                let bases: Vec<_> = spec.bases.iter().map(|b| b.name()).collect();
                println!("  bases: {}", bases.join(", "));
            }
            if let Some(doc) = &spec.docstring {
                println!();
                for line in doc.lines() {
                    println!("  {}", line);
                }
            }
            if !spec.members.is_empty() {
                println!("\n  Members:");
                for member in &spec.members {
                    println!(
                        "    {} [{}] {}",
                        member.name,
                        member.kind.as_str(),
                        member.signature.as_deref().unwrap_or("")
                    );
                }
            }
        }
        SymbolLookup::NotFound { fqn, suggestions } => print_not_found(&fqn, &suggestions),
    }
    Ok(())
}

pub async fn source(config: Arc<AppConfig>, repository: Option<&str>, fqn: &str) -> anyhow::Result<()> {
    let server = QueryServer::new(config);
    match server.read_source_code(repository, fqn).await? {
        SourceLookup::Found(snippet) => {
            println!(
                "# {}:{}-{}",
                snippet.file_path, snippet.start_line, snippet.end_line
            );
            println!("{}", snippet.code);
        }
        SourceLookup::NotFound { fqn, suggestions } => print_not_found(&fqn, &suggestions),
    }
    Ok(())
}

pub async fn search(
    config: Arc<AppConfig>,
    repository: Option<&str>,
    queries: &[String],
    limit: Option<usize>,
    format: &str,
) -> anyhow::Result<()> {
    let server = QueryServer::new(config);
    let response = server.search_knowledge(repository, queries, limit).await?;

    if is_json(format) {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.hits.is_empty() {
        println!("No results for: {}", queries.join(" | "));
        return Ok(());
    }
    println!("Results ({} search):", response.provider);
    for hit in &response.hits {
        println!("  {:.3}  {} [{}]", hit.score, hit.fqn, hit.kind.as_str());
        println!("         {}", hit.snippet);
    }
    Ok(())
}

fn print_not_found(fqn: &str, suggestions: &[String]) {
    println!("Not found: {}", fqn);
    if !suggestions.is_empty() {
        println!("Did you mean:");
        for suggestion in suggestions {
            println!("  {}", suggestion);
        }
    }
}
