//! Hybrid Retrieval Service Entry Point

use std::sync::Arc;

use clap::{Parser, Subcommand};
use hybrid_retrieval::search::{
    DEFAULT_BM25_WEIGHT, DEFAULT_RERANK_TOP_K, DEFAULT_TOP_K, DEFAULT_VECTOR_WEIGHT,
};
use hybrid_retrieval::{Config, ServiceContext};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;

/// Hybrid BM25 + k-NN retrieval over OpenSearch with cross-encoder reranking
#[derive(Parser, Debug)]
#[command(name = "hybrid-retrieval")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the REST API server (default behavior)
    Serve {
        /// Bind address. If not specified, uses config file value.
        #[arg(long)]
        host: Option<String>,
        /// HTTP port. If not specified, uses config file value.
        #[arg(short, long)]
        port: Option<u16>,
        /// Enable JSON logging format
        #[arg(long)]
        json_logs: bool,
    },
    /// Run a hybrid search
    Search {
        /// Natural-language question
        query_text: String,
        /// Keyword for the lexical stream (repeatable)
        #[arg(short, long = "keyword")]
        keywords: Vec<String>,
        /// Number of fused candidates
        #[arg(short = 'n', long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Weight of the BM25 stream (0.0 to 1.0)
        #[arg(long, default_value_t = DEFAULT_BM25_WEIGHT)]
        bm25_weight: f32,
        /// Weight of the vector stream (0.0 to 1.0)
        #[arg(short = 'w', long, default_value_t = DEFAULT_VECTOR_WEIGHT)]
        vector_weight: f32,
        /// Skip cross-encoder reranking
        #[arg(long)]
        no_rerank: bool,
        /// Number of results kept after reranking
        #[arg(short, long, default_value_t = DEFAULT_RERANK_TOP_K)]
        rerank_top_k: usize,
        /// Index to search (defaults to opensearch.default_index)
        #[arg(short, long)]
        index: Option<String>,
    },
    /// Create an index
    CreateIndex {
        /// Index name
        name: String,
        /// JSON mapping file (defaults to the recommended mapping)
        #[arg(short, long)]
        mapping: Option<String>,
    },
    /// Delete an index
    DeleteIndex {
        /// Index name
        name: String,
    },
    /// Show index statistics
    Stats {
        /// Index name (defaults to opensearch.default_index)
        name: Option<String>,
    },
    /// Bulk load JSONL files
    Load {
        /// Target index (defaults to opensearch.default_index)
        #[arg(short, long)]
        index: Option<String>,
        /// Glob pattern (defaults to ingest.source_pattern)
        #[arg(short, long)]
        pattern: Option<String>,
    },
    /// Index a single JSON document
    IndexDocument {
        /// Target index
        index: String,
        /// Path to a JSON object
        file: String,
        /// Explicit document id
        #[arg(long)]
        id: Option<String>,
    },
    /// Extract search keywords from a question
    Keywords {
        /// Question text
        text: String,
    },
    /// Print the recommended index mapping
    Mapping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // For CLI commands (non-serve), use minimal logging
    let is_serve = matches!(args.command, Some(Command::Serve { .. }) | None);

    if !is_serve {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(std::io::stderr)
            .init();
    }

    match args.command {
        Some(Command::Serve {
            host,
            port,
            json_logs,
        }) => run_server(args.config.as_deref(), host, port, json_logs).await,
        None => run_server(args.config.as_deref(), None, None, false).await,
        Some(command) => {
            let config = Config::resolve(args.config.as_deref())?;
            run_command(command, config, args.json).await
        }
    }
}

async fn run_command(command: Command, config: Config, json: bool) -> anyhow::Result<()> {
    match command {
        Command::Search {
            query_text,
            keywords,
            top_k,
            bm25_weight,
            vector_weight,
            no_rerank,
            rerank_top_k,
            index,
        } => {
            let options = cli::SearchOptions {
                query_text,
                keywords,
                top_k,
                bm25_weight,
                vector_weight,
                use_rerank: !no_rerank,
                rerank_top_k,
                index,
            };
            cli::run_search(config, options, json).await
        }
        Command::CreateIndex { name, mapping } => {
            cli::run_create_index(config, name, mapping, json).await
        }
        Command::DeleteIndex { name } => cli::run_delete_index(config, name, json).await,
        Command::Stats { name } => {
            let name = name.unwrap_or_else(|| config.opensearch.default_index.clone());
            cli::run_stats(config, name, json).await
        }
        Command::Load { index, pattern } => cli::run_load(config, index, pattern, json).await,
        Command::IndexDocument { index, file, id } => {
            cli::run_index_document(config, index, file, id, json).await
        }
        Command::Keywords { text } => cli::run_keywords(config, text, json).await,
        Command::Mapping => cli::run_mapping(&config),
        Command::Serve { .. } => unreachable!("serve is dispatched before run_command"),
    }
}

async fn run_server(
    config_path: Option<&str>,
    host: Option<String>,
    port: Option<u16>,
    json_logs: bool,
) -> anyhow::Result<()> {
    let mut config = Config::resolve(config_path)?;

    // Initialize tracing for server mode
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json_logs || config.server.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        "Starting Hybrid Retrieval Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Override bind address from CLI args only if explicitly provided
    if let Some(h) = host {
        config.server.host = h;
    }
    if let Some(p) = port {
        config.server.port = p;
    }

    tracing::info!(
        backend = ?config.opensearch.backend,
        index = %config.opensearch.default_index,
        "Configuration loaded"
    );

    let host = config.server.host.clone();
    let port = config.server.port;
    let context = Arc::new(ServiceContext::init(config).await?);

    hybrid_retrieval::api::serve(context, &host, port).await
}
