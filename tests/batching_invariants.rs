//! Batching Invariant Tests
//!
//! Relational branches are fetched in parent-key batches:
//! - One statement per `relational_batch_size` distinct keys
//! - No statement for a branch without keys
//! - Parent order and per-parent child order survive chunking
//! - A failing batch fails the whole request

mod common;

use common::{admin, query};
use nestquery::config::EngineConfig;
use nestquery::executor::RelationalExecutor;
use nestquery::store::{MemoryRowStore, Row};
use nestquery::EngineErrorCode;
use serde_json::{json, Map, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// `n` articles, each written by its own author
fn authored_store(n: usize) -> MemoryRowStore {
    let articles = (0..n)
        .map(|i| row(json!({"id": i + 1, "title": format!("a{}", i + 1), "author": 1000 + i})))
        .collect();
    let authors = (0..n)
        .map(|i| row(json!({"id": 1000 + i, "name": format!("author {}", i)})))
        .collect();
    MemoryRowStore::new()
        .with_rows("articles", articles)
        .with_rows("authors", authors)
}

/// `n` articles with two comments each, stored in reverse article order
fn commented_store(n: usize) -> MemoryRowStore {
    let articles = (0..n).map(|i| row(json!({"id": i + 1}))).collect();
    let mut comments = Vec::new();
    for i in (0..n).rev() {
        for position in [2, 1] {
            comments.push(row(json!({
                "id": (i + 1) * 10 + position,
                "article": i + 1,
                "body": format!("c{}-{}", i + 1, position),
                "sort": position
            })));
        }
    }
    MemoryRowStore::new()
        .with_rows("articles", articles)
        .with_rows("comments", comments)
}

// =============================================================================
// Statement Counts
// =============================================================================

/// Branch statements grow with ceil(keys / batch size).
#[tokio::test]
async fn test_statements_per_batch() {
    for (n, expected) in [(0, 0), (1, 1), (25, 1), (26, 2), (100, 4)] {
        let ctx = admin();
        let store = authored_store(n);
        let q = query(json!({"fields": ["id", "author.name"], "limit": -1}));

        let result = RelationalExecutor::new(&ctx, &store)
            .query("articles", &q)
            .await
            .unwrap();

        assert_eq!(result.as_array().unwrap().len(), n);
        let statements = store.statements_for("authors");
        assert_eq!(statements.len(), expected, "n = {}", n);
        for statement in &statements {
            assert!(statement.bindings.len() <= 25);
        }
    }
}

#[tokio::test]
async fn test_configured_batch_size() {
    let ctx = admin().with_config(EngineConfig::default().with_batch_size(10));
    let store = authored_store(25);
    let q = query(json!({"fields": ["id", "author.name"]}));

    RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap();

    assert_eq!(store.statements_for("authors").len(), 3);
    assert_eq!(store.round_trips(), 4);
}

/// Duplicate parent keys are fetched once.
#[tokio::test]
async fn test_duplicate_keys_fetched_once() {
    let ctx = admin().with_config(EngineConfig::default().with_batch_size(1));
    let articles = (0..6)
        .map(|i| row(json!({"id": i + 1, "author": 1000 + (i % 2)})))
        .collect();
    let authors = vec![
        row(json!({"id": 1000, "name": "even"})),
        row(json!({"id": 1001, "name": "odd"})),
    ];
    let store = MemoryRowStore::new()
        .with_rows("articles", articles)
        .with_rows("authors", authors);

    let result = RelationalExecutor::new(&ctx, &store)
        .query("articles", &query(json!({"fields": ["id", "author.name"]})))
        .await
        .unwrap();

    assert_eq!(store.statements_for("authors").len(), 2);
    assert_eq!(result[4]["author"], json!({"name": "even"}));
    assert_eq!(result[5]["author"], json!({"name": "odd"}));
}

// =============================================================================
// Ordering
// =============================================================================

/// Chunked to-many branches still attach every child, sorted, to its parent.
#[tokio::test]
async fn test_order_preserved_across_chunks() {
    let ctx = admin().with_config(EngineConfig::default().with_batch_size(2));
    let store = commented_store(5);
    let q = query(json!({"fields": ["id", "comments.body"]}));

    let result = RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap();

    assert_eq!(store.statements_for("comments").len(), 3);
    let articles = result.as_array().unwrap();
    assert_eq!(articles.len(), 5);
    for (i, article) in articles.iter().enumerate() {
        let id = i + 1;
        assert_eq!(article["id"], json!(id));
        assert_eq!(
            article["comments"],
            json!([
                {"body": format!("c{}-1", id)},
                {"body": format!("c{}-2", id)}
            ])
        );
    }
}

// =============================================================================
// Failure
// =============================================================================

/// A failing nested batch aborts the request with the store's error.
#[tokio::test]
async fn test_nested_failure_aborts() {
    let ctx = admin();
    let store = commented_store(3).fail_on("comments");
    let q = query(json!({"fields": ["id", "comments.body"]}));

    let err = RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap_err();

    assert_eq!(err.code(), EngineErrorCode::RowStoreFailure);
}

/// Branches without keys issue no statement at all.
#[tokio::test]
async fn test_null_keys_issue_nothing() {
    let ctx = admin();
    let articles = vec![row(json!({"id": 1, "author": null}))];
    let store = MemoryRowStore::new().with_rows("articles", articles);

    let result = RelationalExecutor::new(&ctx, &store)
        .query("articles", &query(json!({"fields": ["id", "author.name"]})))
        .await
        .unwrap();

    assert_eq!(result, json!([{"id": 1, "author": null}]));
    assert_eq!(store.round_trips(), 1);
}
