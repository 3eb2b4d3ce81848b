use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use knowledge_service::cli;
use knowledge_service::config::KnowledgeConfig;
use knowledge_service::server;
use knowledge_service::service::KnowledgeService;

#[derive(Parser)]
#[command(
    name = "knowledge-service",
    version,
    about = "Tiered knowledge retrieval over MCP and HTTP: rules, project docs and references"
)]
struct Cli {
    /// Config file (defaults to ~/.knowledge/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Act as this login instead of $USER
    #[arg(long, global = true)]
    login: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

#[derive(Subcommand)]
enum Command {
    /// Start the server (transport from config unless given)
    Serve {
        #[arg(long, value_enum)]
        transport: Option<Transport>,
    },
    /// Semantic search over rules, or a project's docs with --project
    Search {
        query: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Ingest a rule or project document from a file
    Ingest {
        #[command(subcommand)]
        target: IngestTarget,
    },
    /// Show store metrics (admin tier)
    Stats,
    /// Check database health and embedding configuration
    Doctor,
    /// Set a login's access tier
    Grant {
        login: String,
        tier: u32,
        /// Restrict to these channels (mcp, http, cli); repeatable
        #[arg(long = "channel")]
        channels: Vec<String>,
    },
    /// List access grants
    Grants,
}

#[derive(Subcommand)]
enum IngestTarget {
    Rule {
        #[arg(long)]
        title: String,
        file: PathBuf,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        tier: Option<u32>,
    },
    Project {
        #[arg(long)]
        project: String,
        file: PathBuf,
        /// Stored path (defaults to FILE as given)
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value = "doc")]
        kind: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => KnowledgeConfig::load_from(path)?,
        None => KnowledgeConfig::load()?,
    };

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let caller = cli::local_caller(cli.login.as_deref());

    match cli.command {
        Command::Serve { transport } => {
            let transport = transport.unwrap_or(match config.server.transport.as_str() {
                "http" => Transport::Http,
                _ => Transport::Stdio,
            });
            match transport {
                Transport::Stdio => server::serve_stdio(config).await?,
                Transport::Http => server::serve_http(config).await?,
            }
        }
        Command::Doctor => cli::doctor::doctor(&config, caller.login())?,
        command => {
            let service = KnowledgeService::open(config)?;
            let result = run(&service, &caller, command).await;
            if let Err(e) = service.shutdown() {
                tracing::warn!(error = %e, "database not closed cleanly");
            }
            result?;
        }
    }

    Ok(())
}

async fn run(
    service: &KnowledgeService,
    caller: &knowledge_service::knowledge::types::Caller,
    command: Command,
) -> Result<()> {
    match command {
        Command::Search { query, project, k, tags } => {
            cli::search::search(service, caller, &query, project.as_deref(), k, tags).await
        }
        Command::Ingest { target } => match target {
            IngestTarget::Rule { title, file, tags, tier } => {
                cli::ingest::rule(service, caller, &title, &file, tags, tier).await
            }
            IngestTarget::Project { project, file, path, kind, tags } => {
                cli::ingest::project_doc(service, caller, &project, &file, path.as_deref(), &kind, tags)
                    .await
            }
        },
        Command::Stats => cli::stats::stats(service, caller).await,
        Command::Grant { login, tier, channels } => {
            cli::grant::grant(service, caller, &login, tier, &channels).await
        }
        Command::Grants => cli::grant::list(service, caller).await,
        Command::Serve { .. } | Command::Doctor => Ok(()),
    }
}
