//! # Repo Lens CLI (`rlens`)
//!
//! ## Usage
//!
//! ```bash
//! rlens --config ./config/rlens.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rlens init` | Create the SQLite database and run schema migrations |
//! | `rlens ingest <url>` | Clone and index a git repository |
//! | `rlens repos` | List ingested repositories |
//! | `rlens rm <id>` | Delete a repository and all of its files |
//! | `rlens ask <id> "<question>"` | Ask a question; streams the answer |
//! | `rlens serve` | Start the HTTP API server |

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use repo_lens::agent::{self, AgentEvent, DoneReason};
use repo_lens::config;
use repo_lens::db;
use repo_lens::ingest;
use repo_lens::migrate;
use repo_lens::models::RepoStatus;
use repo_lens::provider::OpenAiProvider;
use repo_lens::repos;
use repo_lens::server;
use repo_lens::tools::{ToolContext, ToolRegistry};

/// Repo Lens — chat with any git repository through SQL-backed virtual
/// filesystem tools.
#[derive(Parser)]
#[command(
    name = "rlens",
    about = "Repo Lens — chat with any git repository, no checkout required",
    version,
    long_about = "Repo Lens ingests a git repository into SQLite and lets a language-model \
    agent explore it through three virtualized shell tools (list_files, read_file, \
    search_code), streaming its reasoning and answers as it works."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rlens.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, the repos/files tables, the query
    /// indexes, and the trigram search index. Idempotent.
    Init,

    /// Clone and index a git repository.
    ///
    /// The clone is transient; after ingestion only the database holds the
    /// repository. Re-ingesting a known URL is a no-op.
    Ingest {
        /// Clone URL (https or ssh).
        url: String,
    },

    /// List ingested repositories.
    Repos,

    /// Delete a repository and all of its indexed files.
    Rm {
        /// Repository id.
        id: String,
    },

    /// Ask a question about a repository.
    ///
    /// Runs the agent loop against the configured model provider and streams
    /// the answer to stdout. Tool invocations are reported on stderr.
    Ask {
        /// Repository id.
        id: String,
        /// The question to answer.
        question: String,
    },

    /// Start the HTTP API server.
    ///
    /// Serves repository management plus SSE chat on the configured bind
    /// address.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let pool = db::connect(&cfg).await?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { url } => {
            migrate::run_migrations(&pool).await?;
            let report = ingest::ingest_repo(&pool, &cfg.ingest, &url).await?;
            println!("ingest {}", url);
            println!("  repo_id: {}", report.repo_id);
            println!("  status: {}", report.status);
            if report.status == RepoStatus::Ready.as_str() {
                println!("  entries: {}", report.file_count);
            }
        }
        Commands::Repos => {
            let all = repos::list_repos(&pool).await?;
            if all.is_empty() {
                println!("No repositories ingested.");
            }
            for repo in all {
                println!("{}  {}  [{}]  {}", repo.id, repo.name, repo.status, repo.url);
            }
        }
        Commands::Rm { id } => {
            if repos::delete_repo(&pool, &id).await? {
                println!("Deleted {}.", id);
            } else {
                anyhow::bail!("repo not found: {}", id);
            }
        }
        Commands::Ask { id, question } => {
            let repo = repos::get_repo(&pool, &id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("repo not found: {}", id))?;
            if RepoStatus::parse(&repo.status) != RepoStatus::Ready {
                anyhow::bail!("repo is not ready (status: {})", repo.status);
            }

            let provider = Arc::new(OpenAiProvider::from_config(&cfg.llm)?);
            let ctx = ToolContext::new(pool.clone(), id);
            let mut rx = agent::spawn_session(
                provider,
                Arc::new(ToolRegistry::with_builtins()),
                ctx,
                question,
                Vec::new(),
                cfg.agent.max_tool_rounds,
            );

            let mut stdout = std::io::stdout();
            while let Some(event) = rx.recv().await {
                match event {
                    AgentEvent::TextDelta { content } => {
                        print!("{}", content);
                        stdout.flush()?;
                    }
                    AgentEvent::ToolStart { name, arguments } => {
                        eprintln!("→ {} {}", name, arguments);
                    }
                    AgentEvent::ToolResult { name, is_error } => {
                        if is_error {
                            eprintln!("✗ {}", name);
                        }
                    }
                    AgentEvent::Done { reason } => {
                        println!();
                        if reason == DoneReason::IterationCap {
                            eprintln!("(stopped at the exploration limit)");
                        }
                    }
                    AgentEvent::Error { message } => {
                        anyhow::bail!("session failed: {}", message);
                    }
                }
            }
        }
        Commands::Serve => {
            migrate::run_migrations(&pool).await?;
            let provider = Arc::new(OpenAiProvider::from_config(&cfg.llm)?);
            server::run_server(&cfg, pool, provider).await?;
        }
    }

    Ok(())
}
