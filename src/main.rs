//! # RAG Chat CLI (`ragchat`)
//!
//! Operator commands for building the document index and running the chat
//! server.
//!
//! ```bash
//! ragchat --config ./config/ragchat.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragchat init` | Create both SQLite databases and run migrations |
//! | `ragchat index` | Build the vector index from the document directory |
//! | `ragchat retrieve "<query>"` | Print the context retrieved for a query |
//! | `ragchat stats` | Index and account counts |
//! | `ragchat serve` | Start the chat UI server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ragchat::{config, ingest, migrate, retrieve_cmd, server, stats};

/// RAG Chat: retrieval-augmented chat over a directory of text files.
///
/// Without a config file every setting takes its default. See
/// `config/ragchat.example.toml` for all options.
#[derive(Parser)]
#[command(name = "ragchat", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the databases and run migrations (idempotent).
    Init,

    /// Chunk, embed and persist every text file in the document directory.
    Index {
        /// Document directory (defaults to `ingest.directory`).
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Report file and chunk counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the context the retriever returns for a query.
    Retrieve {
        query: String,

        /// Number of chunks (defaults to `index.top_k`).
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Show index and account statistics.
    Stats,

    /// Start the chat UI server.
    Serve,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "ragchat=debug,ragchat_core=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Initialized:");
            println!("  index:    {}", cfg.index.path.display());
            println!("  database: {}", cfg.db.path.display());
        }
        Commands::Index { dir, dry_run } => {
            ingest::run_index(&cfg, dir, dry_run).await?;
        }
        Commands::Retrieve { query, k } => {
            retrieve_cmd::run_retrieve(&cfg, &query, k).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
