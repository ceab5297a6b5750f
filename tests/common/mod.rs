//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use nestquery::config::EngineConfig;
use nestquery::context::RequestContext;
use nestquery::permissions::{Accountability, PermissionRule};
use nestquery::query::QuerySpec;
use nestquery::schema::{SchemaLoader, SchemaOverview};
use nestquery::store::{MemoryRowStore, Row};
use serde_json::{json, Value};

/// Blog schema as a schema overview document
pub const BLOG_SCHEMA: &str = r#"{
    "collections": {
        "articles": {
            "primary": "id",
            "fields": {
                "id": {"type": "integer"},
                "title": {"type": "string"},
                "status": {"type": "string"},
                "rating": {"type": "integer"},
                "featured": {"type": "boolean"},
                "owner": {"type": "string"},
                "author": {"type": "integer"},
                "comments": {"type": "alias", "special": ["o2m"]},
                "tags": {"type": "alias", "special": ["m2m"]},
                "translations": {"type": "alias", "special": ["translations"]},
                "thumbnail": {"type": "alias", "special": ["alias"]}
            }
        },
        "authors": {
            "primary": "id",
            "fields": {"id": {"type": "integer"}, "name": {"type": "string"}}
        },
        "comments": {
            "primary": "id",
            "fields": {
                "id": {"type": "integer"},
                "article": {"type": "integer"},
                "body": {"type": "text"},
                "sort": {"type": "integer"}
            }
        },
        "tags": {
            "primary": "id",
            "fields": {"id": {"type": "integer"}, "name": {"type": "string"}}
        },
        "articles_tags": {
            "primary": "id",
            "fields": {
                "id": {"type": "integer"},
                "articles_id": {"type": "integer"},
                "tags_id": {"type": "integer"}
            }
        },
        "articles_translations": {
            "primary": "id",
            "fields": {
                "id": {"type": "integer"},
                "articles_id": {"type": "integer"},
                "lang": {"type": "string"},
                "title": {"type": "string"}
            }
        },
        "pages": {
            "primary": "id",
            "fields": {"id": {"type": "integer"}, "heading": {"type": "string"}}
        },
        "blocks": {
            "primary": "id",
            "fields": {
                "id": {"type": "integer"},
                "item": {"type": "string"},
                "collection": {"type": "string"}
            }
        },
        "settings": {
            "primary": "id",
            "singleton": true,
            "fields": {"id": {"type": "integer"}, "site_name": {"type": "string"}}
        },
        "test_collection": {
            "primary": "id",
            "fields": {"id": {"type": "integer"}, "name": {"type": "string"}}
        }
    },
    "relations": [
        {"collection": "articles", "field": "author", "related_collection": "authors"},
        {
            "collection": "comments", "field": "article", "related_collection": "articles",
            "meta": {"one_field": "comments", "sort_field": "sort"}
        },
        {
            "collection": "articles_tags", "field": "articles_id", "related_collection": "articles",
            "meta": {"one_field": "tags", "junction_field": "tags_id"}
        },
        {
            "collection": "articles_tags", "field": "tags_id", "related_collection": "tags",
            "meta": {"junction_field": "articles_id"}
        },
        {
            "collection": "articles_translations", "field": "articles_id",
            "related_collection": "articles",
            "meta": {"one_field": "translations"}
        },
        {
            "collection": "blocks", "field": "item",
            "meta": {
                "one_allowed_collections": ["articles", "pages"],
                "one_collection_field": "collection"
            }
        }
    ]
}"#;

pub fn blog_schema() -> Arc<SchemaOverview> {
    Arc::new(SchemaLoader::parse(BLOG_SCHEMA).unwrap())
}

pub fn admin() -> RequestContext {
    RequestContext::admin(blog_schema())
}

pub fn user(rules: Vec<PermissionRule>) -> RequestContext {
    RequestContext::new(
        Accountability::user("u1", "editor"),
        blog_schema(),
        rules,
        EngineConfig::default(),
    )
}

pub fn query(value: Value) -> QuerySpec {
    QuerySpec::from_value(&value).unwrap()
}

pub fn rows(value: Value) -> Vec<Row> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => map,
                other => panic!("row fixture must be an object, got {}", other),
            })
            .collect(),
        other => panic!("rows fixture must be an array, got {}", other),
    }
}

/// Small blog with every relation kind populated
pub fn blog_store() -> MemoryRowStore {
    MemoryRowStore::new()
        .with_rows(
            "articles",
            rows(json!([
                {"id": 1, "title": "Rust", "status": "published", "rating": 5,
                 "featured": 1, "owner": "u1", "author": 10},
                {"id": 2, "title": "Go", "status": "draft", "rating": 3,
                 "featured": 0, "owner": "u2", "author": 11},
                {"id": 3, "title": "Zig", "status": "published", "rating": 4,
                 "featured": 0, "owner": "u1", "author": null}
            ])),
        )
        .with_rows(
            "authors",
            rows(json!([{"id": 10, "name": "Ann"}, {"id": 11, "name": "Bob"}])),
        )
        .with_rows(
            "comments",
            rows(json!([
                {"id": 100, "article": 1, "body": "great post", "sort": 2},
                {"id": 101, "article": 1, "body": "first!", "sort": 1},
                {"id": 102, "article": 2, "body": "rust is better", "sort": 1}
            ])),
        )
        .with_rows(
            "tags",
            rows(json!([{"id": 1, "name": "systems"}, {"id": 2, "name": "web"}])),
        )
        .with_rows(
            "articles_tags",
            rows(json!([
                {"id": 1, "articles_id": 1, "tags_id": 1},
                {"id": 2, "articles_id": 2, "tags_id": 2},
                {"id": 3, "articles_id": 2, "tags_id": 1}
            ])),
        )
        .with_rows(
            "articles_translations",
            rows(json!([
                {"id": 1, "articles_id": 1, "lang": "de", "title": "Rost"},
                {"id": 2, "articles_id": 1, "lang": "fr", "title": "Rouille"}
            ])),
        )
        .with_rows("pages", rows(json!([{"id": 1, "heading": "Home"}])))
        .with_rows(
            "blocks",
            rows(json!([
                {"id": 1, "item": "1", "collection": "articles"},
                {"id": 2, "item": "1", "collection": "pages"},
                {"id": 3, "item": "3", "collection": "articles"}
            ])),
        )
        .with_rows("settings", rows(json!([{"id": 1, "site_name": "Blog"}])))
}
