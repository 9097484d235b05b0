//! # Recall CLI (`recall`)
//!
//! Command-line front end for the retrieval and citation engine.
//!
//! ```bash
//! # Index a directory of .md/.txt files
//! recall ingest ./docs --config ./config/recall.toml
//!
//! # Drop everything and re-index from scratch
//! recall rebuild ./docs
//!
//! # Search the index (optionally pulling fresh web snippets first)
//! recall search "error handling in async rust" --k 5
//! recall search "tokio graceful shutdown" --web
//!
//! # Remove one source's fragments, inspect the collection
//! recall delete notes_v2.md
//! recall stats
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use recall_engine::config::{self, Config};
use recall_engine::documents;
use recall_engine::embedding::create_embedder;
use recall_engine::index::sqlite::SqliteIndex;
use recall_engine::models::UNKNOWN;
use recall_engine::session::ResearchSession;
use recall_engine::store::FragmentStore;
use recall_engine::websearch::create_searcher;

/// Recall — a local-first retrieval and citation engine.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; when the file is absent, built-in defaults are used (SQLite at
/// `./recall.db`, deterministic local embeddings, web search disabled).
#[derive(Parser)]
#[command(
    name = "recall",
    about = "Recall — a local-first retrieval and citation engine",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/recall.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a directory of documents.
    ///
    /// Walks the directory for `.md` and `.txt` files, splits them into
    /// paragraph fragments, and ingests them. Already-indexed fragments
    /// are skipped, so re-running after edits only adds what changed.
    Ingest {
        /// Directory to index.
        dir: PathBuf,
    },

    /// Clear the collection and re-index a directory from scratch.
    Rebuild {
        /// Directory to index.
        dir: PathBuf,
    },

    /// Search indexed fragments.
    ///
    /// Prints cited results; each block carries a `[n]` token that stays
    /// stable for its source across searches in this invocation.
    Search {
        /// The search query string.
        query: String,

        /// Number of results to return.
        #[arg(long)]
        k: Option<usize>,

        /// Relevance floor in [0, 1]; candidates below `1 - floor`
        /// similarity are discarded.
        #[arg(long)]
        floor: Option<f32>,

        /// Fetch fresh web snippets first and search those.
        #[arg(long)]
        web: bool,
    },

    /// Remove all fragments of one source.
    Delete {
        /// Source name as shown by `stats` (e.g. `notes_v2.md`).
        source: String,
    },

    /// Show collection statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Ingest { dir } => {
            let session = open_session(&cfg).await?;
            let inputs = documents::load_documents(&dir, documents::DEFAULT_FRAGMENT_CHARS)?;
            if inputs.is_empty() {
                println!("No .md or .txt files found under {}", dir.display());
                return Ok(());
            }
            let report = session
                .store()
                .ingest(inputs, cfg.ingest.batch_size)
                .await
                .context("ingestion failed")?;
            println!("Ingested {} fragments ({} skipped).", report.added, report.skipped);
        }
        Commands::Rebuild { dir } => {
            let session = open_session(&cfg).await?;
            let inputs = documents::load_documents(&dir, documents::DEFAULT_FRAGMENT_CHARS)?;
            let report = session
                .store()
                .rebuild(inputs, cfg.ingest.batch_size)
                .await
                .context("rebuild failed")?;
            println!(
                "Rebuilt collection: {} fragments ({} skipped).",
                report.added, report.skipped
            );
        }
        Commands::Search {
            query,
            k,
            floor,
            web,
        } => {
            if let Some(k) = k {
                cfg.retrieval.default_k = k;
            }
            if let Some(floor) = floor {
                anyhow::ensure!(
                    (0.0..=1.0).contains(&floor),
                    "--floor must be in [0.0, 1.0]"
                );
                cfg.retrieval.relevance_floor = floor;
            }
            let mut session = open_session(&cfg).await?;
            let output = if web {
                session.search_web(&query).await?
            } else {
                session.search_local(&query).await?
            };
            println!("{}", output);
            let sources = session.render_source_list();
            if !sources.is_empty() {
                println!("\nSources:\n{}", sources);
            }
        }
        Commands::Delete { source } => {
            let mut session = open_session(&cfg).await?;
            if session.delete_source(&source).await? {
                println!("Deleted all fragments of '{}'.", source);
            } else {
                println!("No fragments found for '{}'.", source);
            }
        }
        Commands::Stats => {
            let session = open_session(&cfg).await?;
            let stats = session.stats().await?;
            println!("Fragments: {}", stats.total_count);
            println!("Sources:   {}", stats.unique_source_count);
            for (kind, count) in &stats.counts_by_kind {
                let label = if kind == UNKNOWN { "unknown" } else { kind };
                println!("  {:<8} {}", label, count);
            }
        }
    }

    Ok(())
}

async fn open_session(cfg: &Config) -> Result<ResearchSession> {
    let index = SqliteIndex::open(&cfg.db.path)
        .await
        .with_context(|| format!("failed to open index at {}", cfg.db.path.display()))?;
    let embedder = create_embedder(&cfg.embedding)?;
    let store = Arc::new(FragmentStore::new(
        Box::new(index),
        embedder,
        &cfg.ingest,
        &cfg.retrieval,
    ));
    let searcher = create_searcher(&cfg.web)?;
    Ok(ResearchSession::new(store, searcher, cfg))
}
