//! # notestore CLI (`nstore`)
//!
//! Inspect and maintain the storage of a notes vault.
//!
//! ## Usage
//!
//! ```bash
//! nstore --config ./nstore.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nstore init` | Create both databases and run schema migrations |
//! | `nstore probe` | Show which engine serves each database |
//! | `nstore stats` | Document, embedding and graph counts |
//! | `nstore search "<query>"` | Hybrid search (full-text + metadata) |
//! | `nstore vectors cleanup` | Remove orphaned vector index entries |
//! | `nstore vectors rebuild` | Rebuild the vector index from stored embeddings |
//! | `nstore graph orphans` | Nodes with no edges |
//! | `nstore graph top` | Highest-degree nodes |
//!
//! Logs go to stderr; set `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand, ValueEnum};
use notestore::graph::DegreeOrder;
use notestore::search::SearchArgs;
use notestore::{admin, config, search, stats};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// notestore: storage core of a local notes assistant.
#[derive(Parser)]
#[command(name = "nstore", version, about = "Inspect and maintain notestore storage")]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(long, global = true, default_value = "./nstore.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the storage folder and both databases.
    ///
    /// Idempotent: running it again only re-applies missing migrations.
    Init,

    /// Report engine availability and the engine chosen for each database.
    Probe,

    /// Show storage statistics.
    Stats,

    /// Search indexed notes.
    Search {
        /// The search query string.
        query: String,

        /// Restrict to a folder (recursive).
        #[arg(long, conflicts_with = "path")]
        folder: Option<String>,

        /// Restrict to one note path.
        #[arg(long)]
        path: Option<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Print per-source ranks behind each result.
        #[arg(long)]
        explain: bool,
    },

    /// Vector index maintenance.
    Vectors {
        #[command(subcommand)]
        action: VectorsAction,
    },

    /// Relationship graph queries.
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },
}

#[derive(Subcommand)]
enum VectorsAction {
    /// Delete index entries whose embedding row no longer exists.
    Cleanup,
    /// Drop and refill the index from stored embeddings.
    Rebuild,
}

#[derive(Subcommand)]
enum GraphAction {
    /// List nodes with zero incoming and zero outgoing edges.
    Orphans {
        /// Only nodes of this type (e.g. `document`, `tag`).
        #[arg(long = "type")]
        node_type: Option<String>,
    },
    /// List the highest-degree nodes.
    Top {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, value_enum, default_value_t = OrderArg::Total)]
        order: OrderArg,
        /// Only nodes of this type.
        #[arg(long = "type")]
        node_type: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Incoming,
    Outgoing,
    Total,
}

impl From<OrderArg> for DegreeOrder {
    fn from(o: OrderArg) -> Self {
        match o {
            OrderArg::Incoming => DegreeOrder::Incoming,
            OrderArg::Outgoing => DegreeOrder::Outgoing,
            OrderArg::Total => DegreeOrder::Total,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => admin::run_init(&cfg).await?,
        Commands::Probe => admin::run_probe(&cfg).await?,
        Commands::Stats => stats::run_stats(&cfg).await?,
        Commands::Search {
            query,
            folder,
            path,
            limit,
            explain,
        } => {
            let args = SearchArgs {
                folder,
                path,
                limit,
                explain,
            };
            search::run_search(&cfg, &query, &args).await?;
        }
        Commands::Vectors { action } => match action {
            VectorsAction::Cleanup => admin::run_vectors_cleanup(&cfg).await?,
            VectorsAction::Rebuild => admin::run_vectors_rebuild(&cfg).await?,
        },
        Commands::Graph { action } => match action {
            GraphAction::Orphans { node_type } => {
                admin::run_graph_orphans(&cfg, node_type.as_deref()).await?
            }
            GraphAction::Top {
                limit,
                order,
                node_type,
            } => admin::run_graph_top(&cfg, limit, order.into(), node_type.as_deref()).await?,
        },
    }

    Ok(())
}
