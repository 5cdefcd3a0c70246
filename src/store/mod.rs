//! Vector store abstraction: filter algebra, collections, backends.
//!
//! Two logical collections exist:
//!
//! - [`CORPUS`] — the shared legal corpus; chunks carry `jurisdiction`,
//!   never `tenant_id`.
//! - [`USER_DOCUMENTS`] — tenant-scoped user content; every chunk carries a
//!   non-empty `tenant_id`, and every search or delete against it must
//!   include a `tenant_id` predicate. The backends refuse unscoped calls
//!   in addition to the query layer's own enforcement.
//!
//! Filters are an algebraic expression with an explicit conjunction
//! constructor. [`Filter::all`] normalizes: one predicate stays bare, two
//! or more are wrapped in an [`Filter::And`] node. Backends that translate
//! filters must treat the two shapes distinctly — multi-predicate filters
//! serialized without an explicit conjunction have been misread as
//! disjunctions by deployed vector databases, which leaks across tenants.

mod memory;
mod sqlite;

pub use memory::MemoryVectorStore;
pub use sqlite::SqliteVectorStore;

use async_trait::async_trait;

use crate::error::LexError;
use crate::models::{ChunkRecord, MetaValue, SearchHit, StoredChunk};

/// Shared legal corpus collection.
pub const CORPUS: &str = "corpus";
/// Tenant-scoped user documents collection.
pub const USER_DOCUMENTS: &str = "user_documents";

/// Maximum `k` for nearest-neighbour queries.
pub const MAX_SEARCH_K: usize = 50;

/// A metadata filter: equality predicates composed by conjunction only.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { field: String, value: MetaValue },
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<MetaValue>) -> Filter {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Combine predicates: none → `None`, one → the bare predicate,
    /// two or more → an explicit conjunction node.
    pub fn all(predicates: Vec<Filter>) -> Option<Filter> {
        let mut flat = Vec::new();
        for p in predicates {
            match p {
                Filter::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Filter::And(flat)),
        }
    }

    /// Whether any predicate in this filter targets `field`.
    pub fn constrains(&self, field: &str) -> bool {
        match self {
            Filter::Eq { field: f, .. } => f == field,
            Filter::And(inner) => inner.iter().any(|p| p.constrains(field)),
        }
    }

    /// Structural match against chunk metadata.
    pub fn matches(&self, metadata: &crate::models::ChunkMetadata) -> bool {
        match self {
            Filter::Eq { field, value } => metadata.field(field).as_ref() == Some(value),
            Filter::And(inner) => inner.iter().all(|p| p.matches(metadata)),
        }
    }
}

/// Embedding-indexed collection store.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent upsert keyed by `chunk_id` within the collection.
    async fn upsert(&self, collection: &str, chunks: &[ChunkRecord]) -> Result<usize, LexError>;

    /// Filtered nearest-neighbour search. `k` is clamped to
    /// [1, [`MAX_SEARCH_K`]]; similarity is cosine in `[0, 1]`; ties are
    /// broken by ascending `chunk_id`.
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, LexError>;

    /// Scoped deletion for replace semantics. Returns the number of chunks
    /// removed when the backend reports it.
    async fn delete(&self, collection: &str, filter: &Filter) -> Result<u64, LexError>;

    /// Count chunks matching the filter (all chunks when `None`).
    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<u64, LexError>;

    /// Exact lookup without a query vector, ordered by `chunk_id`.
    async fn get(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<StoredChunk>, LexError>;
}

/// Defence-in-depth guard: `user_documents` search/delete must be scoped by
/// tenant. The query engine builds tenant-first filters; the backends call
/// this anyway.
pub(crate) fn ensure_tenant_scoped(
    collection: &str,
    filter: Option<&Filter>,
) -> Result<(), LexError> {
    if collection != USER_DOCUMENTS {
        return Ok(());
    }
    match filter {
        Some(f) if f.constrains("tenant_id") => Ok(()),
        _ => Err(LexError::TenantScopeMissing),
    }
}

/// Validate chunks before upsert: partition rule, tenant presence, chunk-id
/// shape. Violations are programming errors, not user input problems.
pub(crate) fn validate_chunks(collection: &str, chunks: &[ChunkRecord]) -> Result<(), LexError> {
    for chunk in chunks {
        if !chunk.metadata.partition_is_valid() {
            return Err(LexError::internal(format!(
                "chunk {} carries both tenant_id and jurisdiction",
                chunk.chunk_id
            )));
        }
        if collection == USER_DOCUMENTS
            && chunk
                .metadata
                .tenant_id
                .as_deref()
                .map(|t| t.is_empty())
                .unwrap_or(true)
        {
            return Err(LexError::internal(format!(
                "user document chunk {} has no tenant_id",
                chunk.chunk_id
            )));
        }
        if chunk.chunk_id != chunk.metadata.chunk_id
            || chunk.document_id != chunk.metadata.document_id
        {
            return Err(LexError::internal(format!(
                "chunk {} metadata ids are inconsistent",
                chunk.chunk_id
            )));
        }
    }
    Ok(())
}

pub(crate) fn clamp_k(k: usize) -> usize {
    k.clamp(1, MAX_SEARCH_K)
}
