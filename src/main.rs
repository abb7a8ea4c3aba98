//! # Docent CLI (`docent`)
//!
//! ## Usage
//!
//! ```bash
//! docent --config ./config/docent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docent init` | Create the SQLite database and run schema migrations |
//! | `docent ingest <path>` | Structure, chunk, and embed a file or directory |
//! | `docent documents` | List the document catalog |
//! | `docent search "<query>"` | Search stored chunks |
//! | `docent ask "<question>"` | Answer a question with citations |
//! | `docent serve` | Start the HTTP server |
//! | `docent completions <shell>` | Print a shell completion script |
//!
//! Logs go to stderr; set `RUST_LOG` (e.g. `RUST_LOG=docent=debug`) to
//! change verbosity.

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docent::search::SearchOptions;
use docent::{ask, config, documents, ingest, migrate, search, server};
use docent_core::search::SearchMode;

/// Docent: question answering over technical documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docent.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docent",
    about = "Docent: question answering with citations over technical documents",
    version,
    long_about = "Docent structures service manuals and spec sheets with a language model, \
    stores heading-aware chunks in SQLite with full-text and vector indexes, and answers \
    questions through a bounded search-then-answer agent loop with linked citations."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Ingest a file or a directory of `.txt` / `.pdf` sources.
    ///
    /// Re-ingesting a file replaces its catalog entry and all its chunks.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,
    },

    /// List ingested documents.
    Documents,

    /// Search stored chunks.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `hybrid` (vector + full-text) or `dual` (two embeddings).
        #[arg(long)]
        mode: Option<String>,

        /// Extra keywords for the full-text side (defaults to the query).
        #[arg(long)]
        keywords: Option<String>,

        /// Restrict to a document name or file name. Repeatable.
        #[arg(long = "doc")]
        docs: Vec<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Ask a question and print the answer with citations.
    Ask {
        /// The question.
        question: String,

        /// Prior conversation, passed to the model verbatim.
        #[arg(long, default_value = "")]
        history: String,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print a shell completion script to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docent=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "docent", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path } => {
            ingest::run_ingest(&cfg, &path).await?;
        }
        Commands::Documents => {
            documents::run_documents(&cfg).await?;
        }
        Commands::Search {
            query,
            mode,
            keywords,
            docs,
            limit,
        } => {
            let mode = mode.map(|m| m.parse::<SearchMode>()).transpose()?;
            let opts = SearchOptions {
                query,
                keywords,
                docs,
                mode,
                limit,
            };
            search::run_search(&cfg, opts).await?;
        }
        Commands::Ask { question, history } => {
            ask::run_ask(&cfg, &question, &history).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
