//! Execution Invariant Tests
//!
//! End-to-end behaviour of nested reads against the in-memory row store:
//! - Every relation kind attaches the right rows to the right parents
//! - Output keys are exactly the requested ones, in request order
//! - Pagination, singletons and aggregates shape the result
//! - Compilation is deterministic

mod common;

use common::{admin, blog_store, query, rows};
use nestquery::compiler::{JoinKind, QueryCompiler};
use nestquery::executor::RelationalExecutor;
use nestquery::merge::SyntheticFields;
use nestquery::store::{MemoryRowStore, Statement};
use nestquery::EngineErrorCode;
use serde_json::{json, Value};

// =============================================================================
// Nested Trees
// =============================================================================

/// One query reaching through every to-one and to-many relation kind.
#[tokio::test]
async fn test_nested_tree_across_relation_kinds() {
    let ctx = admin();
    let store = blog_store();
    let q = query(json!({
        "fields": [
            "id", "title", "author.name", "comments.body", "tags.name", "translations.lang"
        ]
    }));

    let result = RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap();

    assert_eq!(
        result,
        json!([
            {
                "id": 1, "title": "Rust",
                "author": {"name": "Ann"},
                "comments": [{"body": "first!"}, {"body": "great post"}],
                "tags": [{"name": "systems"}],
                "translations": [{"lang": "de"}, {"lang": "fr"}]
            },
            {
                "id": 2, "title": "Go",
                "author": {"name": "Bob"},
                "comments": [{"body": "rust is better"}],
                "tags": [{"name": "web"}, {"name": "systems"}],
                "translations": []
            },
            {
                "id": 3, "title": "Zig",
                "author": null,
                "comments": [],
                "tags": [],
                "translations": []
            }
        ])
    );

    // Root plus one statement per relational branch
    assert_eq!(store.round_trips(), 5);
}

/// Output objects carry the requested keys in request order.
#[tokio::test]
async fn test_key_order_follows_request() {
    let ctx = admin();
    let store = blog_store();
    let q = query(json!({"fields": ["comments.body", "title", "author.name", "id"]}));

    let result = RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap();

    let first = result[0].as_object().unwrap();
    let keys: Vec<&str> = first.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["comments", "title", "author", "id"]);
}

/// The any-to-one discriminator picks the collection each row points into.
#[tokio::test]
async fn test_a2o_follows_discriminator() {
    let ctx = admin();
    let store = blog_store();
    let q = query(json!({"fields": ["id", "item:articles.title", "item:pages.heading"]}));

    let result = RelationalExecutor::new(&ctx, &store)
        .query("blocks", &q)
        .await
        .unwrap();

    assert_eq!(
        result,
        json!([
            {"id": 1, "item": {"title": "Rust"}},
            {"id": 2, "item": {"heading": "Home"}},
            {"id": 3, "item": {"title": "Zig"}}
        ])
    );
    // Root plus one statement per candidate collection
    assert_eq!(store.round_trips(), 3);
}

/// Aliases rename relational keys without changing what is fetched.
#[tokio::test]
async fn test_alias_renames_nested_key() {
    let ctx = admin();
    let store = blog_store();
    let q = query(json!({
        "fields": ["id", "writer.name"],
        "alias": {"writer": "author"},
        "filter": {"id": {"_eq": 1}}
    }));

    let result = RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap();

    assert_eq!(result, json!([{"id": 1, "writer": {"name": "Ann"}}]));
}

// =============================================================================
// Pagination and Singletons
// =============================================================================

/// `page` wins over `offset` when both are present.
#[tokio::test]
async fn test_page_overrides_offset() {
    let ctx = admin();
    let store = blog_store();
    let q = query(json!({"fields": ["id"], "limit": 1, "offset": 0, "page": 2}));

    let result = RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap();

    assert_eq!(result, json!([{"id": 2}]));
}

/// Nested limits slice each parent's rows, not the whole batch.
#[tokio::test]
async fn test_nested_limit_is_per_parent() {
    let ctx = admin();
    let store = blog_store();
    let q = query(json!({
        "fields": ["id", "comments.id"],
        "deep": {"comments": {"_limit": 1}}
    }));

    let result = RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap();

    assert_eq!(
        result,
        json!([
            {"id": 1, "comments": [{"id": 101}]},
            {"id": 2, "comments": [{"id": 102}]},
            {"id": 3, "comments": []}
        ])
    );
}

/// Nested arrays fall back to the default limit; `-1` lifts it.
#[tokio::test]
async fn test_nested_default_limit() {
    let ctx = admin();
    let comments: Vec<Value> = (0..150)
        .map(|i| json!({"id": 1000 + i, "article": 1, "body": "c", "sort": i}))
        .collect();
    let store = MemoryRowStore::new()
        .with_rows("articles", rows(json!([{"id": 1, "title": "Rust"}])))
        .with_rows("comments", rows(Value::Array(comments)));
    let nested_count = |result: &Value| result[0]["comments"].as_array().unwrap().len();

    let capped = RelationalExecutor::new(&ctx, &store)
        .query("articles", &query(json!({"fields": ["id", "comments.id"]})))
        .await
        .unwrap();
    assert_eq!(nested_count(&capped), 100);

    let unbounded = RelationalExecutor::new(&ctx, &store)
        .query(
            "articles",
            &query(json!({
                "fields": ["id", "comments.id"],
                "deep": {"comments": {"_limit": -1}}
            })),
        )
        .await
        .unwrap();
    assert_eq!(nested_count(&unbounded), 150);

    let second_page = RelationalExecutor::new(&ctx, &store)
        .query(
            "articles",
            &query(json!({
                "fields": ["id", "comments.id"],
                "deep": {"comments": {"_page": 2}}
            })),
        )
        .await
        .unwrap();
    assert_eq!(nested_count(&second_page), 50);
    assert_eq!(second_page[0]["comments"][0], json!({"id": 1100}));
}

#[tokio::test]
async fn test_singleton_returns_object() {
    let ctx = admin();
    let store = blog_store();

    let result = RelationalExecutor::new(&ctx, &store)
        .query("settings", &query(json!({})))
        .await
        .unwrap();
    assert_eq!(result, json!({"id": 1, "site_name": "Blog"}));

    let empty = MemoryRowStore::new();
    let result = RelationalExecutor::new(&ctx, &empty)
        .query("settings", &query(json!({})))
        .await
        .unwrap();
    assert_eq!(result, Value::Null);
}

// =============================================================================
// Aggregates
// =============================================================================

/// Aggregate outputs nest under their function name beside the group keys.
#[tokio::test]
async fn test_aggregate_nests_by_function() {
    let ctx = admin();
    let store = blog_store();
    let q = query(json!({
        "aggregate": {"count": "*", "sum": "rating"},
        "group": ["status"]
    }));

    let result = RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap();

    let groups = result.as_array().unwrap();
    assert_eq!(groups.len(), 2);
    let published = groups
        .iter()
        .find(|g| g["status"] == json!("published"))
        .unwrap();
    assert_eq!(published["count"], json!(2));
    assert_eq!(published["sum"], json!({"rating": 9}));
}

/// Plain fields must be grouped to be selected beside aggregates.
#[tokio::test]
async fn test_ungrouped_field_with_aggregate_is_rejected() {
    let ctx = admin();
    let store = blog_store();
    let q = query(json!({
        "fields": ["title"],
        "aggregate": {"count": "*"},
        "group": ["status"]
    }));

    let err = RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap_err();
    assert_eq!(err.code(), EngineErrorCode::InvalidQuery);
    assert_eq!(store.round_trips(), 0);
}

/// Many-to-many aggregates are grouped per parent, never across parents.
#[tokio::test]
async fn test_m2m_aggregate_groups_per_parent() {
    let ctx = admin();
    let store = blog_store();
    let q = query(json!({
        "fields": ["id", "tags.name"],
        "deep": {"tags": {"_aggregate": {"count": "*"}, "_groupBy": ["name"]}}
    }));

    let result = RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap();

    let groups = |i: usize| {
        let mut out = result[i]["tags"].as_array().unwrap().clone();
        out.sort_by_key(|g| g["name"].as_str().unwrap_or_default().to_string());
        out
    };
    assert_eq!(groups(0), vec![json!({"name": "systems", "count": 1})]);
    assert_eq!(
        groups(1),
        vec![
            json!({"name": "systems", "count": 1}),
            json!({"name": "web", "count": 1})
        ]
    );
    assert!(groups(2).is_empty());
}

// =============================================================================
// Synthetic and Plain Levels
// =============================================================================

/// An alias field with nothing behind it reads as null on every row.
#[tokio::test]
async fn test_unbacked_alias_field_is_null() {
    let ctx = admin();
    let store = blog_store();
    let q = query(json!({"fields": ["id", "thumbnail"]}));

    let result = RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap();
    for row in result.as_array().unwrap() {
        assert_eq!(row["thumbnail"], Value::Null);
    }

    let synthetic = SyntheticFields::new().register("articles", "thumbnail", |row| {
        json!(format!("/thumbs/{}.png", row.get("id").cloned().unwrap_or(Value::Null)))
    });
    let result = RelationalExecutor::new(&ctx, &store)
        .with_synthetic(synthetic)
        .query("articles", &q)
        .await
        .unwrap();
    assert_eq!(result[0]["thumbnail"], json!("/thumbs/1.png"));
}

/// A flat level comes back exactly as stored, in one round trip.
#[tokio::test]
async fn test_flat_level_round_trip() {
    let ctx = admin();
    let stored = rows(json!([
        {"id": 1, "name": "alpha"},
        {"id": 2, "name": "beta"},
        {"id": 3, "name": null}
    ]));
    let store = MemoryRowStore::new().with_rows("test_collection", stored.clone());

    let result = RelationalExecutor::new(&ctx, &store)
        .query("test_collection", &query(json!({"fields": ["id", "name"]})))
        .await
        .unwrap();

    let expected: Vec<Value> = stored.into_iter().map(Value::Object).collect();
    assert_eq!(result, Value::Array(expected));
    assert_eq!(store.round_trips(), 1);
}

/// Stored booleans are normalized by field type.
#[tokio::test]
async fn test_values_coerced_by_field_type() {
    let ctx = admin();
    let store = blog_store();
    let q = query(json!({"fields": ["id", "featured"], "filter": {"id": {"_in": [1, 2]}}}));

    let result = RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap();

    assert_eq!(
        result,
        json!([{"id": 1, "featured": true}, {"id": 2, "featured": false}])
    );
}

// =============================================================================
// Compilation
// =============================================================================

/// The compiled root level is the statement the executor issues, and
/// repeating a request repeats its statements exactly.
#[tokio::test]
async fn test_compile_matches_executed_statements() {
    let ctx = admin();
    let q = query(json!({
        "fields": ["*", "comments", "author.name"],
        "filter": {"_or": [{"status": {"_eq": "published"}}, {"rating": {"_gte": 4}}]},
        "search": "rust",
        "sort": ["-rating", "title"]
    }));

    let first = blog_store();
    RelationalExecutor::new(&ctx, &first)
        .query("articles", &q)
        .await
        .unwrap();
    let second = blog_store();
    RelationalExecutor::new(&ctx, &second)
        .query("articles", &q)
        .await
        .unwrap();
    assert_eq!(first.statements(), second.statements());

    let compiled = QueryCompiler::new(&ctx).compile("articles", &q).unwrap();
    let root = &first.statements_for("articles")[0];
    assert_eq!(root, &Statement::new(compiled.clauses));
}

/// To-one filters join, to-many filters become correlated sub-selects.
#[test]
fn test_filter_relation_shapes() {
    let ctx = admin();
    let compiler = QueryCompiler::new(&ctx);

    let to_one = compiler
        .compile(
            "articles",
            &query(json!({"filter": {"author": {"name": {"_eq": "Ann"}}}})),
        )
        .unwrap();
    assert_eq!(to_one.clauses.joins.len(), 1);
    assert_eq!(to_one.clauses.joins[0].kind, JoinKind::Left);
    assert_eq!(to_one.clauses.where_clause.exists_count(), 0);

    let to_many = compiler
        .compile(
            "articles",
            &query(json!({"filter": {"comments": {"_some": {"body": {"_contains": "rust"}}}}})),
        )
        .unwrap();
    assert!(to_many.clauses.joins.is_empty());
    assert_eq!(to_many.clauses.where_clause.exists_count(), 1);
}

/// A to-many filter keeps only parents with a matching child.
#[tokio::test]
async fn test_to_many_filter_end_to_end() {
    let ctx = admin();
    let store = blog_store();
    let q = query(json!({
        "fields": ["id"],
        "filter": {"comments": {"_some": {"body": {"_contains": "rust"}}}}
    }));

    let result = RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap();
    assert_eq!(result, json!([{"id": 2}]));
}

/// `count(o2m)` is answered by a correlated count in the root statement.
#[tokio::test]
async fn test_related_count() {
    let ctx = admin();
    let store = blog_store();
    let q = query(json!({"fields": ["id", "count(comments)", "count(tags)"]}));

    let result = RelationalExecutor::new(&ctx, &store)
        .query("articles", &q)
        .await
        .unwrap();

    assert_eq!(
        result,
        json!([
            {"id": 1, "comments_count": 2, "tags_count": 1},
            {"id": 2, "comments_count": 1, "tags_count": 2},
            {"id": 3, "comments_count": 0, "tags_count": 0}
        ])
    );
    assert_eq!(store.round_trips(), 1);
}
