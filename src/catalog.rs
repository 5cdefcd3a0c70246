//! Offline, read-only document catalog.
//!
//! Some sources may not be bulk-crawled; for those, discovery happens
//! against a pre-built SQLite catalog bundled with the deployment and
//! loaded at startup. Listing performs zero network I/O and zero writes.
//!
//! Schema per catalog file:
//!
//! ```text
//! documents(source TEXT, document_id TEXT, canonical_url TEXT,
//!           document_type_prefix TEXT, PRIMARY KEY (source, document_id))
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::LexError;
use crate::models::CatalogItem;

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 200;

/// Structured listing result.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogQueryResult {
    pub source: String,
    pub catalog_version: String,
    pub prefix: Option<String>,
    pub offset: usize,
    pub limit: usize,
    pub count_total: u64,
    pub count_filtered: u64,
    /// Counts grouped by `document_type_prefix` across the whole source,
    /// independent of the prefix filter and of paging.
    pub prefix_counts: BTreeMap<String, u64>,
    pub items: Vec<CatalogItem>,
}

struct CatalogSource {
    pool: SqlitePool,
    catalog_version: String,
}

/// Registry of catalog sources, opened and schema-validated at startup and
/// read-only thereafter. Reload requires a process restart.
pub struct CatalogRegistry {
    sources: BTreeMap<String, CatalogSource>,
}

impl CatalogRegistry {
    pub fn empty() -> Self {
        Self {
            sources: BTreeMap::new(),
        }
    }

    /// Open every `{source}.sqlite` in a directory as a catalog source.
    pub async fn open_dir(dir: &Path) -> Result<Self, LexError> {
        let mut registry = Self::empty();
        let entries = std::fs::read_dir(dir).map_err(|_| LexError::CatalogNotFound {
            message: format!("catalog directory not found: {}", dir.display()),
        })?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e == "sqlite").unwrap_or(false) {
                let source = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                if !source.is_empty() {
                    registry.register(&source, &path, "bundled").await?;
                }
            }
        }
        Ok(registry)
    }

    /// Register one catalog file under a stable source identifier.
    pub async fn register(
        &mut self,
        source: &str,
        path: &Path,
        catalog_version: &str,
    ) -> Result<(), LexError> {
        if !path.exists() {
            return Err(LexError::CatalogNotFound {
                message: format!("catalog database not found for source {}", source),
            });
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| LexError::CatalogNotFound {
                message: format!("catalog open failed: {}", e),
            })?
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|e| LexError::CatalogNotFound {
                message: format!("catalog open failed: {}", e),
            })?;

        validate_schema(&pool).await?;

        self.sources.insert(
            source.trim().to_string(),
            CatalogSource {
                pool,
                catalog_version: catalog_version.to_string(),
            },
        );
        tracing::info!(source = source, "catalog source registered");
        Ok(())
    }

    pub fn list_sources(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    /// List documents for one source with optional prefix filtering.
    ///
    /// Ordering is lexicographic by `document_id`; pagination is
    /// offset/limit bounded by [`MAX_LIMIT`].
    pub async fn list_available(
        &self,
        source: &str,
        prefix: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<CatalogQueryResult, LexError> {
        if limit == 0 || limit > MAX_LIMIT {
            return Err(LexError::invalid_input(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }

        let normalized_source = source.trim();
        let catalog = self
            .sources
            .get(normalized_source)
            .ok_or_else(|| LexError::CatalogNotFound {
                message: format!("unknown catalog source: {}", normalized_source),
            })?;

        let normalized_prefix = prefix.map(str::trim).filter(|p| !p.is_empty());

        let count_total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE source = ?")
                .bind(normalized_source)
                .fetch_one(&catalog.pool)
                .await
                .map_err(catalog_error)?;

        let mut prefix_counts: BTreeMap<String, u64> = BTreeMap::new();
        let rows = sqlx::query(
            "SELECT document_type_prefix, COUNT(*) AS n FROM documents \
             WHERE source = ? GROUP BY document_type_prefix",
        )
        .bind(normalized_source)
        .fetch_all(&catalog.pool)
        .await
        .map_err(catalog_error)?;
        for row in &rows {
            let prefix_value: String = row.get("document_type_prefix");
            let n: i64 = row.get("n");
            prefix_counts.insert(prefix_value, n as u64);
        }
        // Stable keys for the prefixes callers branch on.
        for expected in ["jlr", "NJRE", "other"] {
            prefix_counts.entry(expected.to_string()).or_insert(0);
        }

        let count_filtered: i64 = match normalized_prefix {
            Some(p) => sqlx::query_scalar(
                "SELECT COUNT(*) FROM documents WHERE source = ? AND document_type_prefix = ?",
            )
            .bind(normalized_source)
            .bind(p)
            .fetch_one(&catalog.pool)
            .await
            .map_err(catalog_error)?,
            None => count_total,
        };

        let item_rows = match normalized_prefix {
            Some(p) => {
                sqlx::query(
                    "SELECT document_id, canonical_url, document_type_prefix FROM documents \
                     WHERE source = ? AND document_type_prefix = ? \
                     ORDER BY document_id ASC LIMIT ? OFFSET ?",
                )
                .bind(normalized_source)
                .bind(p)
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(&catalog.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT document_id, canonical_url, document_type_prefix FROM documents \
                     WHERE source = ? ORDER BY document_id ASC LIMIT ? OFFSET ?",
                )
                .bind(normalized_source)
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(&catalog.pool)
                .await
            }
        }
        .map_err(catalog_error)?;

        let items: Vec<CatalogItem> = item_rows
            .iter()
            .map(|row| CatalogItem {
                document_id: row.get("document_id"),
                canonical_url: row.get("canonical_url"),
                document_type_prefix: row.get("document_type_prefix"),
            })
            .collect();

        Ok(CatalogQueryResult {
            source: normalized_source.to_string(),
            catalog_version: catalog.catalog_version.clone(),
            prefix: normalized_prefix.map(|p| p.to_string()),
            offset,
            limit,
            count_total: count_total as u64,
            count_filtered: count_filtered as u64,
            prefix_counts,
            items,
        })
    }

    /// Look up one entry's canonical URL (for single-document retrieval).
    pub async fn canonical_url(
        &self,
        source: &str,
        document_id: &str,
    ) -> Result<String, LexError> {
        let catalog = self
            .sources
            .get(source.trim())
            .ok_or_else(|| LexError::CatalogNotFound {
                message: format!("unknown catalog source: {}", source),
            })?;

        let url: Option<String> = sqlx::query_scalar(
            "SELECT canonical_url FROM documents WHERE source = ? AND document_id = ?",
        )
        .bind(source.trim())
        .bind(document_id)
        .fetch_optional(&catalog.pool)
        .await
        .map_err(catalog_error)?;

        url.ok_or_else(|| LexError::NotFound {
            resource: format!("catalog entry {}/{}", source, document_id),
        })
    }
}

async fn validate_schema(pool: &SqlitePool) -> Result<(), LexError> {
    let table: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'documents'",
    )
    .fetch_optional(pool)
    .await
    .map_err(catalog_error)?;
    if table.is_none() {
        return Err(LexError::CatalogNotFound {
            message: "catalog database missing required table: documents".to_string(),
        });
    }

    let rows = sqlx::query("PRAGMA table_info(documents)")
        .fetch_all(pool)
        .await
        .map_err(catalog_error)?;
    let columns: Vec<String> = rows.iter().map(|r| r.get::<String, _>("name")).collect();
    for required in [
        "source",
        "document_id",
        "canonical_url",
        "document_type_prefix",
    ] {
        if !columns.iter().any(|c| c == required) {
            return Err(LexError::CatalogNotFound {
                message: format!("catalog 'documents' table missing column: {}", required),
            });
        }
    }
    Ok(())
}

fn catalog_error(e: sqlx::Error) -> LexError {
    LexError::CatalogNotFound {
        message: format!("catalog query failed: {}", e),
    }
}
