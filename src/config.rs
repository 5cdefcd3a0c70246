use std::path::PathBuf;

use crate::error::LexError;

/// Application configuration, loaded from environment variables.
///
/// | Variable | Meaning | Default |
/// |----------|---------|---------|
/// | `LEGAL_MCP_INGEST_ROOT` | Allowlisted root for file-based ingestion | `{cwd}/.agent/tmp`, created lazily |
/// | `EMBEDDING_ENDPOINTS` | Comma-separated embedding backend URLs | empty → in-process fallback |
/// | `VECTOR_STORE_PATH` | Directory for vector-store persistence | `{cwd}/data/vectors` |
/// | `CACHE_CAPACITY` | Reference-cache entry bound | 1024 |
/// | `CACHE_DEFAULT_TTL_SECONDS` | Reference-cache TTL | 86400 |
/// | `LEGAL_MCP_CATALOG_DIR` | Directory of per-source catalog SQLite files | unset → no catalogs |
/// | `RENDERER_ENDPOINT` | External headless-renderer URL | unset → renderer disabled |
/// | `LEX_BIND` | Tool server bind address | `127.0.0.1:7441` |
#[derive(Debug, Clone)]
pub struct Config {
    pub ingest_root: Option<PathBuf>,
    pub embedding: EmbeddingConfig,
    pub vector_store_path: PathBuf,
    pub cache_capacity: usize,
    pub cache_default_ttl_seconds: u64,
    pub catalog_dir: Option<PathBuf>,
    pub renderer_endpoint: Option<String>,
    pub server_bind: String,
    pub corpus_workers: usize,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Ordered list of HTTP embedding endpoints. Empty means the in-process
    /// single-flight fallback is used.
    pub endpoints: Vec<String>,
    pub model: String,
    pub dims: usize,
    pub max_batch: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub cooldown_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            model: "jinaai/jina-embeddings-v2-base-de".to_string(),
            dims: 768,
            max_batch: 64,
            timeout_secs: 30,
            max_retries: 3,
            cooldown_secs: 15,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ingest_root: None,
            embedding: EmbeddingConfig::default(),
            vector_store_path: PathBuf::from("data/vectors"),
            cache_capacity: 1024,
            cache_default_ttl_seconds: 86_400,
            catalog_dir: None,
            renderer_endpoint: None,
            server_bind: "127.0.0.1:7441".to_string(),
            corpus_workers: 16,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Config, LexError> {
        let mut config = Config::default();

        if let Some(root) = env_nonempty("LEGAL_MCP_INGEST_ROOT") {
            config.ingest_root = Some(PathBuf::from(root));
        }

        if let Some(endpoints) = env_nonempty("EMBEDDING_ENDPOINTS") {
            config.embedding.endpoints = endpoints
                .split(',')
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(model) = env_nonempty("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(dims) = env_nonempty("EMBEDDING_DIMS") {
            config.embedding.dims = parse_env("EMBEDDING_DIMS", &dims)?;
        }

        if let Some(path) = env_nonempty("VECTOR_STORE_PATH") {
            config.vector_store_path = PathBuf::from(path);
        }
        if let Some(capacity) = env_nonempty("CACHE_CAPACITY") {
            config.cache_capacity = parse_env("CACHE_CAPACITY", &capacity)?;
        }
        if let Some(ttl) = env_nonempty("CACHE_DEFAULT_TTL_SECONDS") {
            config.cache_default_ttl_seconds = parse_env("CACHE_DEFAULT_TTL_SECONDS", &ttl)?;
        }
        if let Some(dir) = env_nonempty("LEGAL_MCP_CATALOG_DIR") {
            config.catalog_dir = Some(PathBuf::from(dir));
        }
        if let Some(endpoint) = env_nonempty("RENDERER_ENDPOINT") {
            config.renderer_endpoint = Some(endpoint);
        }
        if let Some(bind) = env_nonempty("LEX_BIND") {
            config.server_bind = bind;
        }
        if let Some(workers) = env_nonempty("LEX_CORPUS_WORKERS") {
            config.corpus_workers = parse_env("LEX_CORPUS_WORKERS", &workers)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), LexError> {
        if self.embedding.dims == 0 {
            return Err(LexError::invalid_input("EMBEDDING_DIMS must be > 0"));
        }
        if self.embedding.max_batch == 0 {
            return Err(LexError::invalid_input("embedding max_batch must be > 0"));
        }
        if self.cache_capacity == 0 {
            return Err(LexError::invalid_input("CACHE_CAPACITY must be > 0"));
        }
        if self.corpus_workers == 0 {
            return Err(LexError::invalid_input("LEX_CORPUS_WORKERS must be > 0"));
        }
        Ok(())
    }

    /// Resolve the allowlisted ingest root, creating the default lazily.
    ///
    /// A configured root must already exist and be a directory. The default
    /// (`{cwd}/.agent/tmp`) is created on first use and logged.
    pub fn resolve_ingest_root(&self) -> Result<PathBuf, LexError> {
        match &self.ingest_root {
            Some(root) => {
                let resolved =
                    std::fs::canonicalize(root).map_err(|_| LexError::RootMisconfigured {
                        message: "LEGAL_MCP_INGEST_ROOT does not exist".to_string(),
                    })?;
                if !resolved.is_dir() {
                    return Err(LexError::RootMisconfigured {
                        message: "LEGAL_MCP_INGEST_ROOT is not a directory".to_string(),
                    });
                }
                Ok(resolved)
            }
            None => {
                let default_root = std::env::current_dir()
                    .map_err(|e| LexError::RootMisconfigured {
                        message: format!("cannot determine working directory: {}", e),
                    })?
                    .join(".agent")
                    .join("tmp");
                std::fs::create_dir_all(&default_root).map_err(|e| {
                    LexError::RootMisconfigured {
                        message: format!("cannot create default ingest root: {}", e),
                    }
                })?;
                let resolved = std::fs::canonicalize(&default_root).map_err(|e| {
                    LexError::RootMisconfigured {
                        message: format!("cannot resolve default ingest root: {}", e),
                    }
                })?;
                tracing::info!(root = %resolved.display(), "using default ingest root");
                Ok(resolved)
            }
        }
    }

    /// SQLite file for the vector store, inside `vector_store_path`.
    pub fn vector_store_file(&self) -> PathBuf {
        self.vector_store_path.join("vectors.sqlite")
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, LexError> {
    value
        .trim()
        .parse()
        .map_err(|_| LexError::invalid_input(format!("{} has an invalid value", name)))
}

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE_CHARS: usize = 1200;
/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP_CHARS: usize = 150;
/// Size cap for markdown/text files read for ingestion.
pub const DEFAULT_MAX_TEXT_BYTES: u64 = 2_000_000;
/// Character cap for converted text (PDF → Markdown).
pub const DEFAULT_MAX_CONVERTED_CHARS: usize = 5_000_000;
