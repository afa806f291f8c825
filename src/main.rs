//! # Retrieval CLI (`retrieval`)
//!
//! ## Usage
//!
//! ```bash
//! retrieval --config ./config/retrieval.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `retrieval serve` | Start the HTTP server |
//! | `retrieval status` | Initialize the vector index and print its status |
//! | `retrieval ingest <tenant> <file>` | Upload and index a document for a tenant |
//! | `retrieval delete <tenant> <id>` | Delete a document and rebuild the tenant's chunks |
//! | `retrieval documents <tenant>` | List a tenant's documents |
//! | `retrieval search <tenant> "<query>"` | Lexical search in one tenant |
//! | `retrieval global "<query>"` | Vector search over the shared knowledge base |
//! | `retrieval ask "<query>"` | Unified local + global search |
//!
//! Logging goes to stderr and honours `RUST_LOG` (default `info`).

use agency_retrieval::config::{self, Config};
use agency_retrieval::lexical::{LexicalQuery, LexicalStore};
use agency_retrieval::models::{SearchResult, Visibility};
use agency_retrieval::server::{self, AppState};
use agency_retrieval::unified::UnifiedRequest;
use agency_retrieval::vector_store::SearchOptions;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hybrid knowledge retrieval for travel-agency tenants.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "retrieval",
    about = "Hybrid knowledge retrieval: shared vector index + per-tenant lexical store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/retrieval.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Initialize the shared vector index and print its status as JSON.
    Status,

    /// Store a file for a tenant and index it.
    Ingest {
        tenant: String,
        /// Path to a .txt, .md, .pdf, or .docx file.
        file: PathBuf,
        #[arg(long, default_value = "")]
        category: String,
        /// Repeatable tag.
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long, default_value = "private")]
        visibility: Visibility,
    },

    /// Delete a document and rebuild the tenant's chunks.
    Delete { tenant: String, id: String },

    /// List a tenant's documents.
    Documents {
        tenant: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        visibility: Option<Visibility>,
    },

    /// Lexical search in one tenant's documents.
    Search {
        tenant: String,
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        visibility: Option<Visibility>,
        #[arg(long)]
        min_score: Option<f64>,
    },

    /// Vector search over the shared knowledge base.
    Global {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        min_score: Option<f64>,
        /// Diversify results with maximal marginal relevance.
        #[arg(long)]
        mmr: bool,
        #[arg(long)]
        lambda: Option<f64>,
    },

    /// Unified search across a tenant's documents and the remote service.
    Ask {
        query: String,
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        no_local: bool,
        #[arg(long)]
        no_global: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            let state = AppState::from_config(&cfg)?;
            server::run_server(state).await?;
        }
        Commands::Status => {
            let state = AppState::from_config(&cfg)?;
            state.vector.initialize().await;
            let status = state.vector.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Ingest {
            tenant,
            file,
            category,
            tags,
            visibility,
        } => {
            run_ingest(&cfg, &tenant, &file, &category, tags, visibility)?;
        }
        Commands::Delete { tenant, id } => {
            let store = LexicalStore::open(&cfg.lexical, &tenant)?;
            store.delete_document(&id)?;
            println!("Deleted {}. {} chunks remain.", id, store.stats()?.chunks);
        }
        Commands::Documents {
            tenant,
            category,
            visibility,
        } => {
            let store = LexicalStore::open(&cfg.lexical, &tenant)?;
            let docs = store.list_documents(category.as_deref(), visibility)?;
            if docs.is_empty() {
                println!("No documents.");
            }
            for doc in docs {
                println!(
                    "{}  {:<8} {:>4} chunks  {}  [{}]",
                    doc.id,
                    format!("{:?}", doc.status).to_lowercase(),
                    doc.chunk_count,
                    doc.filename,
                    doc.category
                );
                if let Some(err) = &doc.error_message {
                    println!("    error: {}", err);
                }
            }
        }
        Commands::Search {
            tenant,
            query,
            limit,
            category,
            visibility,
            min_score,
        } => {
            let store = LexicalStore::open(&cfg.lexical, &tenant)?;
            let mut q = LexicalQuery::new(
                &query,
                limit.unwrap_or(cfg.retrieval.local_top_k),
                min_score.unwrap_or(cfg.lexical.min_score),
            );
            q.category = category.as_deref();
            q.visibility = visibility;
            print_results(&store.search(&q));
        }
        Commands::Global {
            query,
            limit,
            min_score,
            mmr,
            lambda,
        } => {
            let mut options = SearchOptions::from_config(&cfg.retrieval);
            options.use_mmr = mmr;
            if let Some(limit) = limit {
                options.top_k = limit;
            }
            if let Some(min_score) = min_score {
                options.min_score = min_score;
            }
            if let Some(lambda) = lambda {
                options.set_lambda(lambda)?;
            }

            let state = AppState::from_config(&cfg)?;
            if !state.vector.initialize().await {
                let status = state.vector.status().await;
                anyhow::bail!(
                    "vector index unavailable: {}",
                    status.error.unwrap_or_default()
                );
            }
            print_results(&state.vector.search_with_context(&query, &options).await);
        }
        Commands::Ask {
            query,
            tenant,
            limit,
            no_local,
            no_global,
        } => {
            let state = AppState::from_config(&cfg)?;
            let mut request = UnifiedRequest::new(query);
            request.tenant_id = tenant;
            request.top_k = limit;
            request.include_local = !no_local;
            request.include_global = !no_global;
            let response = state.unified.search(&request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

fn run_ingest(
    cfg: &Config,
    tenant: &str,
    file: &std::path::Path,
    category: &str,
    tags: Vec<String>,
    visibility: Visibility,
) -> anyhow::Result<()> {
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file name: {}", file.display()))?;
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let store = LexicalStore::open(&cfg.lexical, tenant)?;
    let doc = store.ingest(filename, &bytes, category, tags, visibility)?;
    match &doc.error_message {
        Some(err) => println!("{}  error: {}", doc.id, err),
        None => println!("{}  indexed ({} chunks)", doc.id, doc.chunk_count),
    }
    Ok(())
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} #{}  {}",
            i + 1,
            r.score,
            r.source_title.as_deref().unwrap_or(&r.reference),
            r.position,
            format!("{:?}", r.source).to_lowercase()
        );
        let snippet: String = r.content.chars().take(200).collect();
        println!("   {}", snippet.replace('\n', " "));
    }
}
