//! Catalog listing against a freshly built SQLite fixture: pagination,
//! prefix filtering, and whole-source prefix counts.

use std::path::PathBuf;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

use lex_harness::catalog::CatalogRegistry;

async fn build_fixture(tmp: &TempDir) -> PathBuf {
    let path = tmp.path().join("de-state-berlin.sqlite");
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .unwrap()
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    sqlx::query(
        "CREATE TABLE documents (
            source TEXT NOT NULL,
            document_id TEXT NOT NULL,
            canonical_url TEXT NOT NULL,
            document_type_prefix TEXT NOT NULL,
            PRIMARY KEY (source, document_id)
        )",
    )
    .execute(&pool)
    .await
    .unwrap();

    for i in 0..250 {
        sqlx::query("INSERT INTO documents VALUES (?, ?, ?, ?)")
            .bind("de-state-berlin")
            .bind(format!("jlr-{:04}", i))
            .bind(format!("https://example.test/jlr/{}", i))
            .bind("jlr")
            .execute(&pool)
            .await
            .unwrap();
    }
    for i in 0..100 {
        sqlx::query("INSERT INTO documents VALUES (?, ?, ?, ?)")
            .bind("de-state-berlin")
            .bind(format!("NJRE{:06}", i))
            .bind(format!("https://example.test/njre/{}", i))
            .bind("NJRE")
            .execute(&pool)
            .await
            .unwrap();
    }
    pool.close().await;
    path
}

#[tokio::test]
async fn test_pagination_and_prefix_counts() {
    let tmp = TempDir::new().unwrap();
    build_fixture(&tmp).await;

    let registry = CatalogRegistry::open_dir(tmp.path()).await.unwrap();
    assert_eq!(registry.list_sources(), vec!["de-state-berlin".to_string()]);

    // First page of the jlr subset fills the limit.
    let page1 = registry
        .list_available("de-state-berlin", Some("jlr"), 0, 200)
        .await
        .unwrap();
    assert_eq!(page1.items.len(), 200);
    assert!(page1
        .items
        .iter()
        .all(|item| item.document_type_prefix == "jlr"));
    assert_eq!(page1.count_total, 350);
    assert_eq!(page1.count_filtered, 250);

    // Second page holds the remaining 50.
    let page2 = registry
        .list_available("de-state-berlin", Some("jlr"), 200, 200)
        .await
        .unwrap();
    assert_eq!(page2.items.len(), 50);

    // Prefix counts describe the whole source, regardless of paging.
    for result in [&page1, &page2] {
        assert_eq!(result.prefix_counts["jlr"], 250);
        assert_eq!(result.prefix_counts["NJRE"], 100);
        assert_eq!(result.prefix_counts["other"], 0);
    }

    // Ordering is lexicographic by document_id and stable across calls.
    let again = registry
        .list_available("de-state-berlin", Some("jlr"), 0, 200)
        .await
        .unwrap();
    assert_eq!(page1.items, again.items);
    let mut sorted = page1.items.clone();
    sorted.sort_by(|a, b| a.document_id.cmp(&b.document_id));
    assert_eq!(page1.items, sorted);
}

#[tokio::test]
async fn test_limit_bounds() {
    let tmp = TempDir::new().unwrap();
    build_fixture(&tmp).await;
    let registry = CatalogRegistry::open_dir(tmp.path()).await.unwrap();

    let err = registry
        .list_available("de-state-berlin", None, 0, 0)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_input");

    let err = registry
        .list_available("de-state-berlin", None, 0, 201)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_input");
}

#[tokio::test]
async fn test_unknown_source() {
    let tmp = TempDir::new().unwrap();
    build_fixture(&tmp).await;
    let registry = CatalogRegistry::open_dir(tmp.path()).await.unwrap();

    let err = registry
        .list_available("nope", None, 0, 10)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "catalog_not_found");
}

#[tokio::test]
async fn test_empty_prefix_means_unfiltered() {
    let tmp = TempDir::new().unwrap();
    build_fixture(&tmp).await;
    let registry = CatalogRegistry::open_dir(tmp.path()).await.unwrap();

    let result = registry
        .list_available("de-state-berlin", Some("  "), 0, 10)
        .await
        .unwrap();
    assert_eq!(result.prefix, None);
    assert_eq!(result.count_filtered, 350);
}
