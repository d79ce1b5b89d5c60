//! # Motoko RAG CLI (`mrag`)
//!
//! ## Usage
//!
//! ```bash
//! mrag --config ./config/mrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mrag init` | Create the SQLite database and run schema migrations |
//! | `mrag clone` | Clone the configured Motoko sample repositories |
//! | `mrag ingest <code\|docs\|all>` | Embed sources into the vector collections |
//! | `mrag context "<query>"` | Show what retrieval returns for a query |
//! | `mrag ask "<query>"` | One-shot answer |
//! | `mrag stats` | Collection and account counts |
//! | `mrag serve http` | Chat, account, and completion HTTP API |
//! | `mrag serve mcp` | MCP server on stdio |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use motoko_rag::config;
use motoko_rag::ingest::{self, IngestOptions, IngestTarget};
use motoko_rag::mcp;
use motoko_rag::migrate;
use motoko_rag::progress::ProgressMode;
use motoko_rag::repos;
use motoko_rag::search::{self, CollectionFilter};
use motoko_rag::server;
use motoko_rag::stats;

/// Motoko RAG: retrieval-augmented answers and completions for Motoko.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mrag.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "mrag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Clone the repositories listed under `[repos].urls`.
    Clone {
        /// Show what would be cloned without touching the filesystem.
        #[arg(long)]
        dry_run: bool,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Embed Motoko sources and/or Markdown docs into their collections.
    Ingest {
        #[arg(value_enum)]
        target: IngestTarget,

        /// Clear the collection before writing.
        #[arg(long)]
        rebuild: bool,

        /// Count entries without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Ingest at most this many entries per collection.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show retrieval results for a query with scores and metadata.
    Context {
        query: String,

        #[arg(long, value_enum, default_value = "all")]
        collection: CollectionFilter,

        /// Results per collection.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question from retrieved context.
    Ask { query: String },

    /// Show collection sizes and account activity.
    Stats,

    /// Start a server.
    Serve {
        #[command(subcommand)]
        target: ServeTarget,
    },
}

#[derive(Subcommand)]
enum ServeTarget {
    /// Chat, account, and completion-protocol HTTP API.
    Http,
    /// MCP server over stdin/stdout.
    Mcp,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Clone { dry_run, progress } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            repos::run_clone(&cfg, dry_run, mode.reporter().as_ref())?;
        }
        Commands::Ingest {
            target,
            rebuild,
            dry_run,
            limit,
            progress,
        } => {
            if !dry_run {
                migrate::run_migrations(&cfg).await?;
            }
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let opts = IngestOptions {
                rebuild,
                dry_run,
                limit,
            };
            ingest::run_ingest(&cfg, target, &opts, mode.reporter().as_ref()).await?;
        }
        Commands::Context {
            query,
            collection,
            limit,
        } => {
            migrate::run_migrations(&cfg).await?;
            search::run_context(&cfg, &query, collection, limit).await?;
        }
        Commands::Ask { query } => {
            migrate::run_migrations(&cfg).await?;
            search::run_ask(&cfg, &query).await?;
        }
        Commands::Stats => {
            migrate::run_migrations(&cfg).await?;
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve { target } => {
            migrate::run_migrations(&cfg).await?;
            match target {
                ServeTarget::Http => server::run_server(&cfg).await?,
                ServeTarget::Mcp => mcp::run_mcp_stdio(&cfg).await?,
            }
        }
    }

    Ok(())
}
