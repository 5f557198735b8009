//! # Forge Memory CLI (`forge-memory`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `forge-memory sync` | Bring the index in line with the markdown files on disk |
//! | `forge-memory search "<query>"` | Hybrid search (JSON by default, `--pretty` for humans) |
//! | `forge-memory status` | Index statistics |
//! | `forge-memory reset --confirm` | Delete and recreate the index |
//! | `forge-memory log "<message>"` | Append to today's session log |
//! | `forge-memory consolidate` | Fold new session logs into `MEMORY.md` |
//!
//! The project root is the nearest ancestor of the working directory that
//! contains `.forge/memory/`. Settings come from `--config`, else
//! `.forge/memory/config.toml` when present, else built-in defaults.
//!
//! Diagnostics go to stderr and are filtered by `RUST_LOG` (default `warn`).

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use forge_memory::config::Workspace;
use forge_memory::embedding::{self, Embedder};
use forge_memory::error::MemoryError;
use forge_memory::models::{Namespace, SearchResult};
use forge_memory::search::{self, SearchRequest};
use forge_memory::store::{self, MemoryStore};
use forge_memory::{consolidate, progress, session_log, status, sync};

/// Forge Memory: hybrid (vector + keyword) search over a project's markdown memory.
#[derive(Parser)]
#[command(name = "forge-memory", version, about)]
struct Cli {
    /// Path to a configuration file (TOML).
    ///
    /// Defaults to `.forge/memory/config.toml` under the project root, or
    /// built-in defaults when that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index new and changed markdown files and drop deleted ones.
    Sync {
        /// Re-index every file regardless of its hash.
        #[arg(long)]
        force: bool,

        /// Print one line per added, updated or deleted file (stderr).
        #[arg(long)]
        verbose: bool,
    },

    /// Search the memory index.
    ///
    /// Syncs first when files changed since the last sync.
    Search {
        /// Natural-language query.
        query: String,

        /// Restrict results to one namespace.
        #[arg(long, value_enum, default_value = "all")]
        namespace: NamespaceArg,

        /// Restrict results to one agent's notes.
        #[arg(long)]
        agent: Option<String>,

        /// Maximum number of results (default from config).
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum fused score (default from config).
        #[arg(long)]
        threshold: Option<f64>,

        /// Human-readable output instead of JSON.
        #[arg(long)]
        pretty: bool,
    },

    /// Show index statistics.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete the index and recreate it empty.
    Reset {
        /// Required to actually delete anything.
        #[arg(long)]
        confirm: bool,
    },

    /// Append an entry to today's session log.
    Log {
        message: String,

        /// Agent name (e.g. dev, qa, lead).
        #[arg(long)]
        agent: Option<String>,

        /// Story ID (e.g. STORY-003).
        #[arg(long)]
        story: Option<String>,
    },

    /// Append new session log entries to MEMORY.md, grouped by story.
    Consolidate {
        /// Print progress (stderr).
        #[arg(long)]
        verbose: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum NamespaceArg {
    All,
    Project,
    Session,
    Agent,
}

impl NamespaceArg {
    fn filter(self) -> Option<Namespace> {
        match self {
            NamespaceArg::All => None,
            NamespaceArg::Project => Some(Namespace::Project),
            NamespaceArg::Session => Some(Namespace::Session),
            NamespaceArg::Agent => Some(Namespace::Agent),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;
    let ws = Workspace::discover(&cwd, cli.config.as_deref())?;

    match cli.command {
        Commands::Sync { force, verbose } => {
            let embedder = embedding::create_embedder(&ws.config.embedding)?;
            let store = open_store(&ws, embedder.as_ref()).await?;
            if verbose {
                eprintln!("Project root: {}", ws.root.display());
                eprintln!("Memory dir:   {}", ws.memory_dir().display());
            }
            let reporter = progress::reporter(verbose);
            let stats =
                sync::run_sync(&ws, &store, embedder.as_ref(), force, reporter.as_ref()).await?;
            store.close().await;
            println!(
                "Sync complete: +{} added, ~{} updated, -{} deleted, ={} unchanged",
                stats.added, stats.updated, stats.deleted, stats.unchanged
            );
        }
        Commands::Search {
            query,
            namespace,
            agent,
            limit,
            threshold,
            pretty,
        } => {
            let embedder = embedding::create_embedder(&ws.config.embedding)?;
            let store = open_store(&ws, embedder.as_ref()).await?;
            let mut request = SearchRequest::new(query, &ws.config.retrieval);
            request.namespace = namespace.filter();
            request.agent = agent;
            if let Some(limit) = limit {
                request.limit = limit;
            }
            if let Some(threshold) = threshold {
                request.threshold = threshold;
            }

            let results = search::run_search(&ws, &store, embedder.as_ref(), &request).await?;
            store.close().await;

            if pretty {
                print_pretty(&results);
            } else {
                let output = serde_json::json!({ "results": results });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        Commands::Status { json } => {
            let report = status::collect(&ws).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", status::render_text(&report));
            }
        }
        Commands::Reset { confirm } => {
            if !confirm {
                return Err(MemoryError::ResetNotConfirmed.into());
            }
            let embedder = embedding::create_embedder(&ws.config.embedding)?;
            let db_path = ws.db_path();
            let store = store::reset(&db_path, embedder.model_name(), embedder.dims()).await?;
            store.close().await;
            println!("Deleted: {}", db_path.display());
            println!("Database recreated (empty).");
        }
        Commands::Log {
            message,
            agent,
            story,
        } => {
            let path = session_log::append(&ws, &message, agent.as_deref(), story.as_deref())?;
            println!("Logged to {}", path.display());
        }
        Commands::Consolidate { verbose } => {
            let today = chrono::Local::now().date_naive();
            let count = consolidate::run(&ws, today, verbose)?;
            if count > 0 {
                println!(
                    "Consolidation complete: {} entries merged into MEMORY.md",
                    count
                );
            } else {
                println!("Nothing to consolidate.");
            }
        }
    }

    Ok(())
}

async fn open_store(ws: &Workspace, embedder: &dyn Embedder) -> Result<MemoryStore> {
    MemoryStore::open(&ws.db_path(), embedder.model_name(), embedder.dims()).await
}

fn print_pretty(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    let rule = "=".repeat(60);
    for (i, r) in results.iter().enumerate() {
        println!("\n{}", rule);
        println!("Result {}/{}  (score: {:.4})", i + 1, results.len(), r.score);
        println!("File:      {}", r.file);
        println!("Namespace: {}", r.namespace);
        if let Some(heading) = &r.heading {
            println!("Heading:   {}", heading);
        }
        println!("Lines:     {}-{}", r.start_line, r.end_line);
        println!("{}", "-".repeat(60));
        println!("{}", r.text);
    }
    println!("\n{}", rule);
    println!("{} result(s)", results.len());
}
