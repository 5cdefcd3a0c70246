//! SQLite-backed [`VectorStore`] implementation.
//!
//! The persistent backend. One `chunks` table holds content, the embedding
//! as a little-endian f32 BLOB, and one column per filterable metadata
//! field, so equality filters compile to indexed `WHERE` clauses. Candidate
//! rows are fetched with the filter applied and scored by cosine similarity
//! in Rust; ranking ties are broken by `chunk_id`.
//!
//! Rows are keyed by `(collection, scope, chunk_id)` where `scope` is the
//! tenant (empty for the shared corpus). Content-derived chunk IDs are
//! deliberately tenant-free, so the same document ingested by two tenants
//! collides on `chunk_id` — the scope column keeps the copies separate.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::LexError;
use crate::models::{ChunkMetadata, ChunkRecord, MetaValue, SearchHit, SourceKind, StoredChunk};

use super::{clamp_k, ensure_tenant_scoped, validate_chunks, Filter, VectorStore};

/// Metadata fields with a dedicated column. Filters may only target these;
/// anything else is a programming error surfaced as an internal fault.
const FILTER_COLUMNS: &[&str] = &[
    "tenant_id",
    "case_id",
    "document_id",
    "chunk_id",
    "source_name",
    "source_kind",
    "ingested_at",
    "embedding_model",
    "jurisdiction",
    "law_abbrev",
    "norm_id",
    "law_title",
    "norm_title",
    "level",
    "paragraph_count",
    "paragraph_index",
    "parent_norm_id",
    "tags_csv",
    "tag",
];

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open (or create) the store at the given SQLite file and run
    /// migrations. The parent directory is created if missing.
    pub async fn open(path: &Path) -> Result<Self, LexError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(LexError::VectorStore)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), LexError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                collection TEXT NOT NULL,
                scope TEXT NOT NULL DEFAULT '',
                chunk_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                embedding_model TEXT NOT NULL,
                tenant_id TEXT,
                case_id TEXT,
                source_name TEXT NOT NULL,
                source_kind TEXT NOT NULL,
                ingested_at INTEGER NOT NULL,
                source_url TEXT,
                relative_path TEXT,
                jurisdiction TEXT,
                law_abbrev TEXT,
                norm_id TEXT,
                law_title TEXT,
                norm_title TEXT,
                level TEXT,
                paragraph_count INTEGER,
                paragraph_index INTEGER,
                parent_norm_id TEXT,
                tags_csv TEXT,
                tag TEXT,
                extra_json TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (collection, scope, chunk_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_tenant ON chunks(collection, tenant_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(collection, document_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_law ON chunks(collection, law_abbrev)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Compile a filter to a `WHERE` fragment plus its bind values.
    ///
    /// A bare predicate compiles to a single comparison; a conjunction node
    /// compiles to a parenthesized `AND` chain. The two shapes stay
    /// distinguishable all the way to the backend.
    fn compile_filter(filter: &Filter) -> Result<(String, Vec<MetaValue>), LexError> {
        match filter {
            Filter::Eq { field, value } => {
                if !FILTER_COLUMNS.contains(&field.as_str()) {
                    return Err(LexError::internal(format!(
                        "filter targets unknown field: {}",
                        field
                    )));
                }
                Ok((format!("{} = ?", field), vec![value.clone()]))
            }
            Filter::And(inner) => {
                if inner.len() < 2 {
                    return Err(LexError::internal(
                        "conjunction node with fewer than two predicates",
                    ));
                }
                let mut fragments = Vec::with_capacity(inner.len());
                let mut values = Vec::new();
                for predicate in inner {
                    let (fragment, mut vals) = Self::compile_filter(predicate)?;
                    fragments.push(fragment);
                    values.append(&mut vals);
                }
                Ok((format!("({})", fragments.join(" AND ")), values))
            }
        }
    }

    fn bind_values<'q>(
        mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        values: &'q [MetaValue],
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        for value in values {
            query = match value {
                MetaValue::Str(s) => query.bind(s),
                MetaValue::Int(i) => query.bind(i),
                MetaValue::Bool(b) => query.bind(b),
            };
        }
        query
    }

    fn row_to_metadata(row: &sqlx::sqlite::SqliteRow) -> Result<ChunkMetadata, LexError> {
        let source_kind: String = row.get("source_kind");
        let source_kind = match source_kind.as_str() {
            "corpus-norm" => SourceKind::CorpusNorm,
            "markdown-file" => SourceKind::MarkdownFile,
            "pdf-derived" => SourceKind::PdfDerived,
            _ => SourceKind::PlainText,
        };
        let extra_json: String = row.get("extra_json");
        let extra: BTreeMap<String, String> =
            serde_json::from_str(&extra_json).unwrap_or_default();

        Ok(ChunkMetadata {
            tenant_id: row.get("tenant_id"),
            case_id: row.get("case_id"),
            document_id: row.get("document_id"),
            chunk_id: row.get("chunk_id"),
            source_name: row.get("source_name"),
            source_kind,
            ingested_at: row.get("ingested_at"),
            embedding_model: row.get("embedding_model"),
            source_url: row.get("source_url"),
            relative_path: row.get("relative_path"),
            jurisdiction: row.get("jurisdiction"),
            law_abbrev: row.get("law_abbrev"),
            norm_id: row.get("norm_id"),
            law_title: row.get("law_title"),
            norm_title: row.get("norm_title"),
            level: row.get("level"),
            paragraph_count: row.get("paragraph_count"),
            paragraph_index: row.get("paragraph_index"),
            parent_norm_id: row.get("parent_norm_id"),
            tags_csv: row.get("tags_csv"),
            tag: row.get("tag"),
            extra,
        })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, collection: &str, chunks: &[ChunkRecord]) -> Result<usize, LexError> {
        validate_chunks(collection, chunks)?;

        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            let meta = &chunk.metadata;
            let extra_json = serde_json::to_string(&meta.extra)?;
            let scope = meta.tenant_id.clone().unwrap_or_default();
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    collection, scope, chunk_id, document_id, content, embedding,
                    embedding_model, tenant_id, case_id, source_name, source_kind,
                    ingested_at, source_url, relative_path, jurisdiction, law_abbrev,
                    norm_id, law_title, norm_title, level, paragraph_count,
                    paragraph_index, parent_norm_id, tags_csv, tag, extra_json
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, scope, chunk_id) DO UPDATE SET
                    document_id = excluded.document_id,
                    content = excluded.content,
                    embedding = excluded.embedding,
                    embedding_model = excluded.embedding_model,
                    tenant_id = excluded.tenant_id,
                    case_id = excluded.case_id,
                    source_name = excluded.source_name,
                    source_kind = excluded.source_kind,
                    ingested_at = excluded.ingested_at,
                    source_url = excluded.source_url,
                    relative_path = excluded.relative_path,
                    jurisdiction = excluded.jurisdiction,
                    law_abbrev = excluded.law_abbrev,
                    norm_id = excluded.norm_id,
                    law_title = excluded.law_title,
                    norm_title = excluded.norm_title,
                    level = excluded.level,
                    paragraph_count = excluded.paragraph_count,
                    paragraph_index = excluded.paragraph_index,
                    parent_norm_id = excluded.parent_norm_id,
                    tags_csv = excluded.tags_csv,
                    tag = excluded.tag,
                    extra_json = excluded.extra_json
                "#,
            )
            .bind(collection)
            .bind(scope)
            .bind(&chunk.chunk_id)
            .bind(&chunk.document_id)
            .bind(&chunk.content)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(&meta.embedding_model)
            .bind(&meta.tenant_id)
            .bind(&meta.case_id)
            .bind(&meta.source_name)
            .bind(meta.source_kind.as_str())
            .bind(meta.ingested_at)
            .bind(&meta.source_url)
            .bind(&meta.relative_path)
            .bind(&meta.jurisdiction)
            .bind(&meta.law_abbrev)
            .bind(&meta.norm_id)
            .bind(&meta.law_title)
            .bind(&meta.norm_title)
            .bind(&meta.level)
            .bind(meta.paragraph_count)
            .bind(meta.paragraph_index)
            .bind(&meta.parent_norm_id)
            .bind(&meta.tags_csv)
            .bind(&meta.tag)
            .bind(extra_json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
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

        let (where_sql, values) = match filter {
            Some(f) => {
                let (fragment, values) = Self::compile_filter(f)?;
                (format!("collection = ? AND {}", fragment), values)
            }
            None => ("collection = ?".to_string(), Vec::new()),
        };

        let sql = format!("SELECT * FROM chunks WHERE {}", where_sql);
        let rows = Self::bind_values(sqlx::query(&sql).bind(collection), &values)
            .fetch_all(&self.pool)
            .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let metadata = Self::row_to_metadata(row)?;
            let blob: Vec<u8> = row.get("embedding");
            let embedding = blob_to_vec(&blob);
            hits.push(SearchHit {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                similarity: cosine_similarity(query, &embedding),
                content: row.get("content"),
                metadata: metadata.safe_subset(),
            });
        }

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
        let (fragment, values) = Self::compile_filter(filter)?;
        let sql = format!(
            "DELETE FROM chunks WHERE collection = ? AND {}",
            fragment
        );
        let result = Self::bind_values(sqlx::query(&sql).bind(collection), &values)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self, collection: &str, filter: Option<&Filter>) -> Result<u64, LexError> {
        let (where_sql, values) = match filter {
            Some(f) => {
                let (fragment, values) = Self::compile_filter(f)?;
                (format!("collection = ? AND {}", fragment), values)
            }
            None => ("collection = ?".to_string(), Vec::new()),
        };
        let sql = format!("SELECT COUNT(*) AS n FROM chunks WHERE {}", where_sql);
        let row = Self::bind_values(sqlx::query(&sql).bind(collection), &values)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    async fn get(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
    ) -> Result<Vec<StoredChunk>, LexError> {
        ensure_tenant_scoped(collection, Some(filter))?;
        let (fragment, values) = Self::compile_filter(filter)?;
        let sql = format!(
            "SELECT * FROM chunks WHERE collection = ? AND {} ORDER BY chunk_id ASC LIMIT ?",
            fragment
        );
        let rows = Self::bind_values(sqlx::query(&sql).bind(collection), &values)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in &rows {
            let metadata = Self::row_to_metadata(row)?;
            chunks.push(StoredChunk {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                content: row.get("content"),
                metadata: metadata.safe_subset(),
            });
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::USER_DOCUMENTS;
    use tempfile::TempDir;

    fn chunk(tenant: &str, doc: &str, index: usize, embedding: Vec<f32>) -> ChunkRecord {
        let chunk_id = format!("{}:{}", doc, index);
        ChunkRecord {
            chunk_id: chunk_id.clone(),
            document_id: doc.to_string(),
            content: format!("content {}", chunk_id),
            embedding,
            metadata: ChunkMetadata {
                tenant_id: Some(tenant.to_string()),
                document_id: doc.to_string(),
                chunk_id,
                source_name: "test.txt".into(),
                ..ChunkMetadata::default()
            },
        }
    }

    async fn open_store(tmp: &TempDir) -> SqliteVectorStore {
        SqliteVectorStore::open(&tmp.path().join("vectors.sqlite"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_search_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        store
            .upsert(
                USER_DOCUMENTS,
                &[
                    chunk("t1", "d1", 0, vec![1.0, 0.0, 0.0]),
                    chunk("t1", "d2", 0, vec![0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let filter = Filter::eq("tenant_id", "t1");
        let hits = store
            .search(USER_DOCUMENTS, &[1.0, 0.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "d1:0");
        assert!(hits[0].similarity > 0.99);
        assert_eq!(hits[0].content, "content d1:0");
    }

    #[tokio::test]
    async fn test_upsert_idempotent_by_chunk_id() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let c = chunk("t1", "d1", 0, vec![1.0, 0.0]);
        store.upsert(USER_DOCUMENTS, &[c.clone()]).await.unwrap();
        store.upsert(USER_DOCUMENTS, &[c]).await.unwrap();
        assert_eq!(store.count(USER_DOCUMENTS, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_conjunction_filter_compiles_to_and() {
        let filter = Filter::all(vec![
            Filter::eq("tenant_id", "t1"),
            Filter::eq("case_id", "c1"),
        ])
        .unwrap();
        let (sql, values) = SqliteVectorStore::compile_filter(&filter).unwrap();
        assert_eq!(sql, "(tenant_id = ? AND case_id = ?)");
        assert_eq!(values.len(), 2);

        let bare = Filter::eq("tenant_id", "t1");
        let (sql, _) = SqliteVectorStore::compile_filter(&bare).unwrap();
        assert_eq!(sql, "tenant_id = ?");
    }

    #[tokio::test]
    async fn test_unknown_filter_field_is_internal_error() {
        let filter = Filter::eq("content", "x; DROP TABLE chunks");
        let err = SqliteVectorStore::compile_filter(&filter).unwrap_err();
        assert_eq!(err.code(), "internal");
    }

    #[tokio::test]
    async fn test_delete_respects_scope() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        store
            .upsert(
                USER_DOCUMENTS,
                &[
                    chunk("t1", "d1", 0, vec![1.0]),
                    chunk("t2", "d1", 0, vec![1.0]),
                ],
            )
            .await
            .unwrap();

        // Same document_id under two tenants; only t1's copy goes away.
        let filter = Filter::all(vec![
            Filter::eq("tenant_id", "t1"),
            Filter::eq("document_id", "d1"),
        ])
        .unwrap();
        let removed = store.delete(USER_DOCUMENTS, &filter).await.unwrap();
        assert_eq!(removed, 1);

        let t2 = Filter::eq("tenant_id", "t2");
        assert_eq!(
            store.count(USER_DOCUMENTS, Some(&t2)).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_get_orders_by_chunk_id() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        store
            .upsert(
                USER_DOCUMENTS,
                &[
                    chunk("t1", "d1", 2, vec![1.0]),
                    chunk("t1", "d1", 0, vec![1.0]),
                    chunk("t1", "d1", 1, vec![1.0]),
                ],
            )
            .await
            .unwrap();
        let filter = Filter::all(vec![
            Filter::eq("tenant_id", "t1"),
            Filter::eq("document_id", "d1"),
        ])
        .unwrap();
        let chunks = store.get(USER_DOCUMENTS, &filter, 100).await.unwrap();
        let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["d1:0", "d1:1", "d1:2"]);
    }
}
