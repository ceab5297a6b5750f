//! Shared schema fixtures for unit tests

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::permissions::{Accountability, PermissionRule};
use crate::schema::{CollectionOverview, FieldOverview, FieldType, Relation, SchemaOverview};

fn field(field_type: FieldType) -> FieldOverview {
    FieldOverview::new(field_type)
}

fn alias(special: &str) -> FieldOverview {
    FieldOverview::new(FieldType::Alias).with_special(special)
}

/// Articles with authors, comments, tags, translations and an any-to-one
/// `blocks.item` pointing at articles or pages.
pub fn blog_schema() -> SchemaOverview {
    SchemaOverview::new()
        .with_collection(
            "articles",
            CollectionOverview::new("id")
                .with_field("id", field(FieldType::Integer))
                .with_field("title", field(FieldType::String))
                .with_field("body", field(FieldType::Text))
                .with_field("status", field(FieldType::String))
                .with_field("rating", field(FieldType::Integer))
                .with_field("price", field(FieldType::Float))
                .with_field("published_on", field(FieldType::DateTime))
                .with_field("metadata", field(FieldType::Json))
                .with_field("author", field(FieldType::Integer))
                .with_field("comments", alias("o2m"))
                .with_field("tags", alias("m2m"))
                .with_field("translations", alias("translations"))
                .with_field("thumbnail", alias("alias")),
        )
        .with_collection(
            "authors",
            CollectionOverview::new("id")
                .with_field("id", field(FieldType::Integer))
                .with_field("name", field(FieldType::String))
                .with_field("company", field(FieldType::Integer)),
        )
        .with_collection(
            "companies",
            CollectionOverview::new("id")
                .with_field("id", field(FieldType::Integer))
                .with_field("name", field(FieldType::String)),
        )
        .with_collection(
            "comments",
            CollectionOverview::new("id")
                .with_field("id", field(FieldType::Integer))
                .with_field("article", field(FieldType::Integer))
                .with_field("body", field(FieldType::Text))
                .with_field("spam", field(FieldType::Boolean))
                .with_field("sort", field(FieldType::Integer)),
        )
        .with_collection(
            "tags",
            CollectionOverview::new("id")
                .with_field("id", field(FieldType::Integer))
                .with_field("name", field(FieldType::String)),
        )
        .with_collection(
            "articles_tags",
            CollectionOverview::new("jid")
                .with_field("jid", field(FieldType::Integer))
                .with_field("articles_id", field(FieldType::Integer))
                .with_field("tags_id", field(FieldType::Integer))
                .with_field("sort", field(FieldType::Integer)),
        )
        .with_collection(
            "articles_translations",
            CollectionOverview::new("id")
                .with_field("id", field(FieldType::Integer))
                .with_field("articles_id", field(FieldType::Integer))
                .with_field("languages_code", field(FieldType::String))
                .with_field("title", field(FieldType::String)),
        )
        .with_collection(
            "pages",
            CollectionOverview::new("id")
                .with_field("id", field(FieldType::Integer))
                .with_field("heading", field(FieldType::String)),
        )
        .with_collection(
            "blocks",
            CollectionOverview::new("id")
                .with_field("id", field(FieldType::Integer))
                .with_field("item", field(FieldType::String))
                .with_field("collection", field(FieldType::String)),
        )
        .with_relation(Relation::m2o("articles", "author", "authors"))
        .with_relation(Relation::m2o("authors", "company", "companies"))
        .with_relation(
            Relation::m2o("comments", "article", "articles")
                .with_one_field("comments")
                .with_sort_field("sort"),
        )
        .with_relation(
            Relation::m2o("articles_tags", "articles_id", "articles")
                .with_one_field("tags")
                .with_junction_field("tags_id")
                .with_sort_field("sort"),
        )
        .with_relation(
            Relation::m2o("articles_tags", "tags_id", "tags").with_junction_field("articles_id"),
        )
        .with_relation(
            Relation::m2o("articles_translations", "articles_id", "articles")
                .with_one_field("translations"),
        )
        .with_relation(Relation::a2o(
            "blocks",
            "item",
            "collection",
            &["articles", "pages"],
        ))
}

pub fn admin_ctx() -> RequestContext {
    RequestContext::admin(Arc::new(blog_schema()))
}

pub fn user_ctx(rules: Vec<PermissionRule>) -> RequestContext {
    RequestContext::new(
        Accountability::user("u1", "editor"),
        Arc::new(blog_schema()),
        rules,
        EngineConfig::default(),
    )
}
