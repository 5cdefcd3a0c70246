//! In-memory [`VectorStore`] implementation.
//!
//! The ephemeral backend: used by tests and by deployments that rebuild
//! their index at startup. `BTreeMap` keyed by `(scope, chunk_id)` behind
//! `std::sync::RwLock` — the scope is the tenant (empty for the corpus),
//! so identical content ingested by two tenants keeps both copies. Search
//! is brute-force cosine over the filtered set.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::LexError;
use crate::models::{ChunkRecord, SearchHit, StoredChunk};

use super::{clamp_k, ensure_tenant_scoped, validate_chunks, Filter, VectorStore};

type ScopedKey = (String, String);

pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, BTreeMap<ScopedKey, ChunkRecord>>>,
}

fn scoped_key(chunk: &ChunkRecord) -> ScopedKey {
    (
        chunk.metadata.tenant_id.clone().unwrap_or_default(),
        chunk.chunk_id.clone(),
    )
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, collection: &str, chunks: &[ChunkRecord]) -> Result<usize, LexError> {
        validate_chunks(collection, chunks)?;
        let mut guard = self
            .collections
            .write()
            .map_err(|_| LexError::internal("store lock poisoned"))?;
        let entries = guard.entry(collection.to_string()).or_default();
        for chunk in chunks {
            entries.insert(scoped_key(chunk), chunk.clone());
        }
        Ok(chunks.len())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, LexError> {
        ensure_tenant_scoped(collection, filter)?;
        let guard = self
            .collections
            .read()
            .map_err(|_| LexError::internal("store lock poisoned"))?;
        let Some(entries) = guard.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<SearchHit> = entries
            .values()
            .filter(|chunk| filter.map(|f| f.matches(&chunk.metadata)).unwrap_or(true))
            .map(|chunk| SearchHit {
                chunk_id: chunk.chunk_id.clone(),
                document_id: chunk.document_id.clone(),
                similarity: cosine_similarity(query, &chunk.embedding),
                content: chunk.content.clone(),
                metadata: chunk.metadata.safe_subset(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(clamp_k(k));
        Ok(hits)
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<u64, LexError> {
        ensure_tenant_scoped(collection, Some(filter))?;
        let mut guard = self
            .collections
            .write()
            .map_err(|_| LexError::internal("store lock poisoned"))?;
        let Some(entries) = guard.get_mut(collection) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|_, chunk| !filter.matches(&chunk.metadata));
        Ok((before - entries.len()) as u64)
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<u64, LexError> {
        let guard = self
            .collections
            .read()
            .map_err(|_| LexError::internal("store lock poisoned"))?;
        let Some(entries) = guard.get(collection) else {
            return Ok(0);
        };
        let count = entries
            .values()
            .filter(|chunk| filter.map(|f| f.matches(&chunk.metadata)).unwrap_or(true))
            .count();
        Ok(count as u64)
    }

    async fn get(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<StoredChunk>, LexError> {
        ensure_tenant_scoped(collection, Some(filter))?;
        let guard = self
            .collections
            .read()
            .map_err(|_| LexError::internal("store lock poisoned"))?;
        let Some(entries) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        // Iteration order is (scope, chunk_id); with a tenant-scoped filter
        // the scope is fixed, so results come out in chunk_id order.
        Ok(entries
            .values()
            .filter(|chunk| filter.matches(&chunk.metadata))
            .take(limit)
            .map(|chunk| StoredChunk {
                chunk_id: chunk.chunk_id.clone(),
                document_id: chunk.document_id.clone(),
                content: chunk.content.clone(),
                metadata: chunk.metadata.safe_subset(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, SourceKind};
    use crate::store::{CORPUS, USER_DOCUMENTS};

    fn user_chunk(tenant: &str, doc: &str, index: usize, embedding: Vec<f32>) -> ChunkRecord {
        let chunk_id = format!("{}:{}", doc, index);
        ChunkRecord {
            chunk_id: chunk_id.clone(),
            document_id: doc.to_string(),
            content: format!("content of {}", chunk_id),
            embedding,
            metadata: ChunkMetadata {
                tenant_id: Some(tenant.to_string()),
                document_id: doc.to_string(),
                chunk_id,
                source_name: "test.txt".into(),
                source_kind: SourceKind::PlainText,
                ..ChunkMetadata::default()
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryVectorStore::new();
        let chunk = user_chunk("t1", "d1", 0, vec![1.0, 0.0]);
        store.upsert(USER_DOCUMENTS, &[chunk.clone()]).await.unwrap();
        store.upsert(USER_DOCUMENTS, &[chunk]).await.unwrap();
        assert_eq!(store.count(USER_DOCUMENTS, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_requires_tenant_scope() {
        let store = MemoryVectorStore::new();
        let err = store
            .search(USER_DOCUMENTS, &[1.0, 0.0], 10, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "tenant_scope_missing");
    }

    #[tokio::test]
    async fn test_search_filters_by_tenant() {
        let store = MemoryVectorStore::new();
        store
            .upsert(
                USER_DOCUMENTS,
                &[
                    user_chunk("t1", "d1", 0, vec![1.0, 0.0]),
                    user_chunk("t2", "d2", 0, vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let filter = Filter::eq("tenant_id", "t1");
        let hits = store
            .search(USER_DOCUMENTS, &[1.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "d1");
        assert_eq!(hits[0].metadata["tenant_id"], "t1");
    }

    #[tokio::test]
    async fn test_search_ranks_and_breaks_ties_by_chunk_id() {
        let store = MemoryVectorStore::new();
        store
            .upsert(
                USER_DOCUMENTS,
                &[
                    user_chunk("t1", "b", 0, vec![1.0, 0.0]),
                    user_chunk("t1", "a", 0, vec![1.0, 0.0]),
                    user_chunk("t1", "c", 0, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let filter = Filter::eq("tenant_id", "t1");
        let hits = store
            .search(USER_DOCUMENTS, &[1.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        // Equal similarity: lexicographic chunk_id ordering.
        assert_eq!(hits[0].chunk_id, "a:0");
        assert_eq!(hits[1].chunk_id, "b:0");
        // Orthogonal vector ranks last with similarity 0.
        assert_eq!(hits[2].chunk_id, "c:0");
        assert!(hits[2].similarity <= f32::EPSILON);
    }

    #[tokio::test]
    async fn test_delete_scoped() {
        let store = MemoryVectorStore::new();
        store
            .upsert(
                USER_DOCUMENTS,
                &[
                    user_chunk("t1", "d1", 0, vec![1.0, 0.0]),
                    user_chunk("t1", "d1", 1, vec![1.0, 0.0]),
                    user_chunk("t1", "d2", 0, vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let filter = Filter::all(vec![
            Filter::eq("tenant_id", "t1"),
            Filter::eq("document_id", "d1"),
        ])
        .unwrap();
        let removed = store.delete(USER_DOCUMENTS, &filter).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count(USER_DOCUMENTS, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corpus_needs_no_tenant() {
        let store = MemoryVectorStore::new();
        let mut chunk = user_chunk("t1", "bgb_para_433", 0, vec![1.0, 0.0]);
        chunk.metadata.tenant_id = None;
        chunk.metadata.jurisdiction = Some("de-federal".into());
        chunk.metadata.source_kind = SourceKind::CorpusNorm;
        store.upsert(CORPUS, &[chunk]).await.unwrap();
        let hits = store.search(CORPUS, &[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_identical_content_coexists_across_tenants() {
        // Content-derived chunk IDs collide across tenants; the scoped key
        // must keep both copies.
        let store = MemoryVectorStore::new();
        store
            .upsert(
                USER_DOCUMENTS,
                &[
                    user_chunk("t1", "doc_abc", 0, vec![1.0, 0.0]),
                    user_chunk("t2", "doc_abc", 0, vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(store.count(USER_DOCUMENTS, None).await.unwrap(), 2);

        let t1 = Filter::eq("tenant_id", "t1");
        let hits = store
            .search(USER_DOCUMENTS, &[1.0, 0.0], 10, Some(&t1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["tenant_id"], "t1");
    }

    #[tokio::test]
    async fn test_rejects_user_chunk_without_tenant() {
        let store = MemoryVectorStore::new();
        let mut chunk = user_chunk("t1", "d1", 0, vec![1.0]);
        chunk.metadata.tenant_id = None;
        let err = store.upsert(USER_DOCUMENTS, &[chunk]).await.unwrap_err();
        assert_eq!(err.code(), "internal");
    }
}
