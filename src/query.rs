//! Query engine: semantic search over the corpus and user documents.
//!
//! Both modes embed the query, build an equality-conjunction filter, and
//! rank hits by descending similarity with ties broken by `chunk_id`.
//! Results carry a bounded excerpt — a prefix of the chunk content cut at a
//! character boundary — plus a safe metadata subset. Full content is only
//! returned by the explicit lookup paths (`get_law_by_id`).

use serde::Serialize;
use serde_json::Value;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::LexError;
use crate::models::StoredChunk;
use crate::store::{Filter, VectorStore, CORPUS, MAX_SEARCH_K, USER_DOCUMENTS};

pub const DEFAULT_N_RESULTS: usize = 10;
pub const DEFAULT_EXCERPT_CHARS: usize = 500;

/// One search hit as returned to tools.
#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub chunk_id: String,
    pub document_id: String,
    pub similarity: f32,
    pub excerpt: String,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct CorpusSearchParams {
    pub query: String,
    pub law_abbrev: Option<String>,
    pub level: Option<String>,
    pub n_results: usize,
}

impl Default for CorpusSearchParams {
    fn default() -> Self {
        Self {
            query: String::new(),
            law_abbrev: None,
            level: None,
            n_results: DEFAULT_N_RESULTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserSearchParams {
    pub query: String,
    pub tenant_id: String,
    pub case_id: Option<String>,
    pub document_id: Option<String>,
    pub source_name: Option<String>,
    pub tag: Option<String>,
    pub n_results: usize,
    pub excerpt_chars: usize,
}

impl UserSearchParams {
    pub fn new(query: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            tenant_id: tenant_id.into(),
            case_id: None,
            document_id: None,
            source_name: None,
            tag: None,
            n_results: DEFAULT_N_RESULTS,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }
}

/// Semantic search over the shared legal corpus.
pub async fn search_laws(
    store: &dyn VectorStore,
    provider: &dyn EmbeddingProvider,
    params: &CorpusSearchParams,
) -> Result<Vec<QueryHit>, LexError> {
    validate_query(&params.query)?;
    validate_n_results(params.n_results)?;
    if let Some(level) = params.level.as_deref() {
        if level != "norm" && level != "paragraph" && level != "law" {
            return Err(LexError::invalid_input(
                "level must be one of: law, norm, paragraph",
            ));
        }
    }

    let mut predicates = Vec::new();
    if let Some(abbrev) = nonempty(params.law_abbrev.as_deref()) {
        predicates.push(Filter::eq("law_abbrev", abbrev.to_uppercase().as_str()));
    }
    if let Some(level) = nonempty(params.level.as_deref()) {
        predicates.push(Filter::eq("level", level));
    }
    let filter = Filter::all(predicates);

    let query_vector = embed_query(provider, &params.query).await?;
    let hits = store
        .search(CORPUS, &query_vector, params.n_results, filter.as_ref())
        .await?;

    Ok(hits
        .into_iter()
        .map(|hit| QueryHit {
            chunk_id: hit.chunk_id,
            document_id: hit.document_id,
            similarity: hit.similarity,
            excerpt: excerpt_prefix(&hit.content, DEFAULT_EXCERPT_CHARS),
            metadata: hit.metadata,
        })
        .collect())
}

/// Semantic search over one tenant's documents.
///
/// `tenant_id` is mandatory and always the first predicate; the store
/// refuses unscoped calls independently.
pub async fn search_documents(
    store: &dyn VectorStore,
    provider: &dyn EmbeddingProvider,
    params: &UserSearchParams,
) -> Result<Vec<QueryHit>, LexError> {
    validate_query(&params.query)?;
    validate_n_results(params.n_results)?;
    if params.tenant_id.trim().is_empty() {
        return Err(LexError::invalid_input("tenant_id must be non-empty"));
    }
    if params.excerpt_chars == 0 {
        return Err(LexError::invalid_input("excerpt_chars must be >= 1"));
    }

    let filter = tenant_filter(
        params.tenant_id.trim(),
        params.case_id.as_deref(),
        params.document_id.as_deref(),
        params.source_name.as_deref(),
        params.tag.as_deref(),
    );

    let query_vector = embed_query(provider, &params.query).await?;
    let hits = store
        .search(
            USER_DOCUMENTS,
            &query_vector,
            params.n_results,
            Some(&filter),
        )
        .await?;

    Ok(hits
        .into_iter()
        .map(|hit| QueryHit {
            chunk_id: hit.chunk_id,
            document_id: hit.document_id,
            similarity: hit.similarity,
            excerpt: excerpt_prefix(&hit.content, params.excerpt_chars),
            metadata: hit.metadata,
        })
        .collect())
}

/// Build the tenant-scoped filter. `tenant_id` always comes first; empty
/// optional values are treated as absent.
pub fn tenant_filter(
    tenant_id: &str,
    case_id: Option<&str>,
    document_id: Option<&str>,
    source_name: Option<&str>,
    tag: Option<&str>,
) -> Filter {
    let mut predicates = vec![Filter::eq("tenant_id", tenant_id)];
    if let Some(case) = nonempty(case_id) {
        predicates.push(Filter::eq("case_id", case));
    }
    if let Some(document) = nonempty(document_id) {
        predicates.push(Filter::eq("document_id", document));
    }
    if let Some(source) = nonempty(source_name) {
        predicates.push(Filter::eq("source_name", source));
    }
    if let Some(tag) = nonempty(tag) {
        let normalized = tag.trim().to_lowercase();
        predicates.push(Filter::eq("tag", normalized.as_str()));
    }
    // At least the tenant predicate is present, so all() cannot be None.
    Filter::all(predicates).unwrap_or_else(|| Filter::eq("tenant_id", tenant_id))
}

/// Exact lookup of a law's stored documents, without semantic search.
///
/// With `norm_id`, returns the matching norm and its paragraphs; without,
/// returns every stored document of the law (bounded). Full content is
/// returned — this is the explicit retrieval path.
pub async fn get_law_by_id(
    store: &dyn VectorStore,
    law_abbrev: &str,
    norm_id: Option<&str>,
) -> Result<Vec<StoredChunk>, LexError> {
    if law_abbrev.trim().is_empty() {
        return Err(LexError::invalid_input("law_abbrev must be non-empty"));
    }

    let mut predicates = vec![Filter::eq(
        "law_abbrev",
        law_abbrev.trim().to_uppercase().as_str(),
    )];
    if let Some(norm) = nonempty(norm_id) {
        predicates.push(Filter::eq("norm_id", norm));
    }
    let filter = Filter::all(predicates)
        .unwrap_or_else(|| Filter::eq("law_abbrev", law_abbrev.trim().to_uppercase().as_str()));

    let chunks = store.get(CORPUS, &filter, 500).await?;
    if chunks.is_empty() {
        return Err(LexError::NotFound {
            resource: match norm_id {
                Some(norm) => format!("{} {}", law_abbrev, norm),
                None => law_abbrev.to_string(),
            },
        });
    }
    Ok(chunks)
}

/// Collection statistics for the stats tool.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub corpus_chunks: u64,
    pub corpus_norms: u64,
    pub corpus_paragraphs: u64,
    pub user_document_chunks: u64,
    pub embedding_model: String,
    pub embedding_dims: usize,
}

pub async fn get_law_stats(
    store: &dyn VectorStore,
    provider: &dyn EmbeddingProvider,
) -> Result<StoreStats, LexError> {
    let corpus_chunks = store.count(CORPUS, None).await?;
    let corpus_norms = store
        .count(CORPUS, Some(&Filter::eq("level", "norm")))
        .await?;
    let corpus_paragraphs = store
        .count(CORPUS, Some(&Filter::eq("level", "paragraph")))
        .await?;
    let user_document_chunks = store.count(USER_DOCUMENTS, None).await?;

    Ok(StoreStats {
        corpus_chunks,
        corpus_norms,
        corpus_paragraphs,
        user_document_chunks,
        embedding_model: provider.model_name().to_string(),
        embedding_dims: provider.dims(),
    })
}

/// Prefix of `content` with at most `max_chars` characters, cut at a
/// character boundary. A pure prefix: a caller holding the excerpt can
/// verify it against the full chunk retrieved explicitly.
pub fn excerpt_prefix(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        content.chars().take(max_chars).collect()
    }
}

fn validate_query(query: &str) -> Result<(), LexError> {
    if query.trim().chars().count() < 2 {
        return Err(LexError::invalid_input(
            "query must be at least 2 characters",
        ));
    }
    Ok(())
}

fn validate_n_results(n: usize) -> Result<(), LexError> {
    if n == 0 || n > MAX_SEARCH_K {
        return Err(LexError::invalid_input(format!(
            "n_results must be between 1 and {}",
            MAX_SEARCH_K
        )));
    }
    Ok(())
}

fn nonempty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embedding;
    use crate::ingest::{ingest_documents, IngestOptions, TextDocument};
    use crate::models::SourceKind;
    use crate::store::MemoryVectorStore;
    use std::sync::Arc;

    async fn setup() -> (MemoryVectorStore, Arc<dyn EmbeddingProvider>) {
        let provider = embedding::local_provider(&EmbeddingConfig {
            dims: 32,
            ..EmbeddingConfig::default()
        })
        .await;
        (MemoryVectorStore::new(), provider)
    }

    async fn ingest(
        store: &MemoryVectorStore,
        provider: &dyn EmbeddingProvider,
        tenant: &str,
        case: Option<&str>,
        name: &str,
        text: &str,
    ) {
        let mut options = IngestOptions::new(tenant);
        options.case_id = case.map(|c| c.to_string());
        let report = ingest_documents(
            store,
            provider,
            &options,
            &[TextDocument {
                source_name: name.to_string(),
                text: text.to_string(),
                document_id: None,
                metadata: None,
            }],
            SourceKind::PlainText,
        )
        .await
        .unwrap();
        assert_eq!(report.status, "complete");
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let (store, provider) = setup().await;
        let text = "Die Kündigungsfrist beträgt vier Wochen.";
        ingest(&store, provider.as_ref(), "T1", Some("C1"), "a.txt", text).await;
        ingest(&store, provider.as_ref(), "T2", Some("C1"), "a.txt", text).await;

        let hits = search_documents(
            &store,
            provider.as_ref(),
            &UserSearchParams::new("Kündigungsfrist", "T1"),
        )
        .await
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["tenant_id"], "T1");

        let empty = search_documents(
            &store,
            provider.as_ref(),
            &UserSearchParams::new("Kündigungsfrist", "T3"),
        )
        .await
        .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_query_too_short() {
        let (store, provider) = setup().await;
        let err = search_documents(
            &store,
            provider.as_ref(),
            &UserSearchParams::new("x", "T1"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[tokio::test]
    async fn test_n_results_bounds() {
        let (store, provider) = setup().await;
        let mut params = UserSearchParams::new("Kündigung", "T1");
        params.n_results = 51;
        let err = search_documents(&store, provider.as_ref(), &params)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn test_tenant_filter_shape() {
        // Single condition: bare predicate.
        let bare = tenant_filter("t1", None, None, None, None);
        assert!(matches!(bare, Filter::Eq { .. }));

        // Multiple conditions: explicit conjunction, tenant first.
        let conj = tenant_filter("t1", Some("c1"), None, None, Some("Mietrecht"));
        match conj {
            Filter::And(predicates) => {
                assert_eq!(predicates.len(), 3);
                assert!(matches!(
                    &predicates[0],
                    Filter::Eq { field, .. } if field == "tenant_id"
                ));
                // Tag is normalized for the single-token equality escape.
                assert!(matches!(
                    &predicates[2],
                    Filter::Eq { field, value } if field == "tag"
                        && *value == crate::models::MetaValue::Str("mietrecht".into())
                ));
            }
            other => panic!("expected conjunction, got {:?}", other),
        }

        // Empty strings count as absent.
        let bare_again = tenant_filter("t1", Some(""), Some("  "), None, None);
        assert!(matches!(bare_again, Filter::Eq { .. }));
    }

    #[tokio::test]
    async fn test_excerpt_is_bounded_prefix() {
        let (store, provider) = setup().await;
        let text = "Ä".repeat(2000);
        ingest(&store, provider.as_ref(), "T1", None, "long.txt", &text).await;

        let mut params = UserSearchParams::new("Ä Inhalt", "T1");
        params.excerpt_chars = 100;
        let hits = search_documents(&store, provider.as_ref(), &params)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].excerpt.chars().count(), 100);
        // The excerpt is a strict prefix of the chunk content.
        assert!(text.starts_with(&hits[0].excerpt));
    }

    #[test]
    fn test_excerpt_prefix_short_content_untouched() {
        assert_eq!(excerpt_prefix("kurz", 500), "kurz");
    }

    #[tokio::test]
    async fn test_get_law_by_id_not_found() {
        let (store, _provider) = setup().await;
        let err = get_law_by_id(&store, "BGB", Some("§ 9999"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
