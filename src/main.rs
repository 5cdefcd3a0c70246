//! # Lex CLI (`lex`)
//!
//! The `lex` binary drives the legal retrieval service: corpus ingestion,
//! search, catalog listing, statistics, and the tool server.
//!
//! ```bash
//! lex ingest-corpus ./corpus/gesetze     # bulk-ingest a local HTML tree
//! lex search "Kaufvertrag Pflichten"     # semantic search over the corpus
//! lex search-docs "Schimmel" --tenant t1 # search one tenant's documents
//! lex catalog de-state-berlin --prefix jlr
//! lex stats
//! lex serve                              # start the tool server
//! ```
//!
//! Configuration comes from the environment; see `config` for the variable
//! contract (`LEGAL_MCP_INGEST_ROOT`, `EMBEDDING_ENDPOINTS`,
//! `VECTOR_STORE_PATH`, `CACHE_CAPACITY`, `CACHE_DEFAULT_TTL_SECONDS`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use lex_harness::catalog::CatalogRegistry;
use lex_harness::config::Config;
use lex_harness::embedding;
use lex_harness::ingest::{self, CorpusIngestOptions};
use lex_harness::query;
use lex_harness::refcache::RefCache;
use lex_harness::renderer::HttpRenderer;
use lex_harness::server;
use lex_harness::store::{SqliteVectorStore, VectorStore};
use lex_harness::tools::{ToolContext, ToolRegistry};

#[derive(Parser)]
#[command(
    name = "lex",
    about = "Lex Harness — tenant-isolated legal document ingestion and retrieval for AI tools",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the tool server.
    Serve,

    /// Bulk-ingest a local tree of legal HTML into the shared corpus.
    ///
    /// Layout: `{root}/{law_abbrev}/{norm}.html`. Re-running resumes:
    /// already-ingested norms are skipped.
    IngestCorpus {
        /// Root directory of the HTML tree.
        root: std::path::PathBuf,

        /// Jurisdiction recorded on every corpus chunk.
        #[arg(long, default_value = "de-federal")]
        jurisdiction: String,

        /// Worker pool size for parsing.
        #[arg(long)]
        workers: Option<usize>,

        /// Maximum number of files to process.
        #[arg(long)]
        max_files: Option<usize>,
    },

    /// Semantic search over the shared corpus.
    Search {
        query: String,

        /// Filter by law abbreviation (e.g. BGB, StGB).
        #[arg(long)]
        law: Option<String>,

        /// Filter by level: law, norm, or paragraph.
        #[arg(long)]
        level: Option<String>,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Semantic search over one tenant's documents.
    SearchDocs {
        query: String,

        #[arg(long)]
        tenant: String,

        #[arg(long)]
        case: Option<String>,

        #[arg(long)]
        tag: Option<String>,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// List a catalog source.
    Catalog {
        source: String,

        #[arg(long)]
        prefix: Option<String>,

        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Collection statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Arc::new(Config::from_env()?);

    let store: Arc<dyn VectorStore> =
        Arc::new(SqliteVectorStore::open(&config.vector_store_file()).await?);
    let provider = embedding::create_provider(&config.embedding).await?;

    match cli.command {
        Commands::Serve => {
            let catalog = match &config.catalog_dir {
                Some(dir) => Arc::new(CatalogRegistry::open_dir(dir).await?),
                None => Arc::new(CatalogRegistry::empty()),
            };
            let cache = Arc::new(RefCache::new(
                config.cache_capacity,
                Duration::from_secs(config.cache_default_ttl_seconds),
            ));
            let renderer = match &config.renderer_endpoint {
                Some(endpoint) => Some(Arc::new(HttpRenderer::new(endpoint, 60)?)
                    as Arc<dyn lex_harness::renderer::DocumentRenderer>),
                None => None,
            };

            // Log the resolved ingest root once at startup so misconfiguration
            // shows up before the first file-based tool call.
            match config.resolve_ingest_root() {
                Ok(root) => tracing::info!(root = %root.display(), "ingest root ready"),
                Err(e) => tracing::warn!(error = %e, "ingest root unavailable"),
            }

            let context = Arc::new(ToolContext {
                config: config.clone(),
                store,
                provider,
                catalog,
                cache,
                renderer,
            });
            let registry = Arc::new(ToolRegistry::with_builtins());
            server::run_server(&config.server_bind, registry, context).await?;
        }

        Commands::IngestCorpus {
            root,
            jurisdiction,
            workers,
            max_files,
        } => {
            let options = CorpusIngestOptions {
                jurisdiction,
                workers: workers.unwrap_or(config.corpus_workers),
                max_files,
                ..CorpusIngestOptions::default()
            };
            let report = ingest::ingest_corpus_tree(store, provider, &root, &options).await?;

            println!("ingest-corpus {}", root.display());
            println!("  files discovered: {}", report.files_discovered);
            println!("  files processed:  {}", report.files_processed);
            println!("  documents added:  {}", report.documents_added);
            println!("  documents skipped: {}", report.documents_skipped);
            println!("  errors: {}", report.error_count);
            for error in &report.errors {
                println!("    {}", error);
            }
            println!("  elapsed: {:.1}s", report.elapsed_seconds);
            println!("ok");
        }

        Commands::Search {
            query,
            law,
            level,
            limit,
        } => {
            let params = query::CorpusSearchParams {
                query,
                law_abbrev: law,
                level,
                n_results: limit,
            };
            let hits = query::search_laws(store.as_ref(), provider.as_ref(), &params).await?;
            print_hits(&hits);
        }

        Commands::SearchDocs {
            query,
            tenant,
            case,
            tag,
            limit,
        } => {
            let mut params = query::UserSearchParams::new(query, tenant);
            params.case_id = case;
            params.tag = tag;
            params.n_results = limit;
            let hits =
                query::search_documents(store.as_ref(), provider.as_ref(), &params).await?;
            print_hits(&hits);
        }

        Commands::Catalog {
            source,
            prefix,
            offset,
            limit,
        } => {
            let dir = config.catalog_dir.clone().ok_or_else(|| {
                anyhow::anyhow!("LEGAL_MCP_CATALOG_DIR is not set; no catalogs available")
            })?;
            let registry = CatalogRegistry::open_dir(&dir).await?;
            let result = registry
                .list_available(&source, prefix.as_deref(), offset, limit)
                .await?;

            println!("catalog {} (version {})", result.source, result.catalog_version);
            println!(
                "  total: {}  filtered: {}  offset: {}  limit: {}",
                result.count_total, result.count_filtered, result.offset, result.limit
            );
            for (prefix_value, count) in &result.prefix_counts {
                println!("  prefix {}: {}", prefix_value, count);
            }
            for item in &result.items {
                println!("  {}  {}", item.document_id, item.canonical_url);
            }
        }

        Commands::Stats => {
            let stats = query::get_law_stats(store.as_ref(), provider.as_ref()).await?;
            println!("corpus chunks:        {}", stats.corpus_chunks);
            println!("  norms:              {}", stats.corpus_norms);
            println!("  paragraphs:         {}", stats.corpus_paragraphs);
            println!("user document chunks: {}", stats.user_document_chunks);
            println!("embedding model:      {}", stats.embedding_model);
            println!("embedding dims:       {}", stats.embedding_dims);
        }
    }

    Ok(())
}

fn print_hits(hits: &[query::QueryHit]) {
    if hits.is_empty() {
        println!("No results.");
        return;
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({})",
            rank + 1,
            hit.similarity,
            hit.document_id,
            hit.chunk_id
        );
        let excerpt: String = hit.excerpt.chars().take(240).collect();
        println!("    {}", excerpt.replace('\n', " "));
    }
}
