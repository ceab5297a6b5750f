//! Relation kind resolution
//!
//! A field on a collection is relational if it is the foreign key side of a
//! relation (many-to-one, any-to-one) or the alias side of one (one-to-many,
//! many-to-many through a junction, translations).

use super::types::{Relation, SchemaOverview};

/// Closed set of relation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    M2O,
    O2M,
    M2M,
    A2O,
    Translations,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::M2O => "m2o",
            RelationKind::O2M => "o2m",
            RelationKind::M2M => "m2m",
            RelationKind::A2O => "a2o",
            RelationKind::Translations => "translations",
        }
    }

    /// Kinds that produce an array per parent row
    pub fn is_to_many(&self) -> bool {
        matches!(
            self,
            RelationKind::O2M | RelationKind::M2M | RelationKind::Translations
        )
    }
}

/// Many-to-many junction, seen from the parent collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunctionDescriptor {
    /// Junction collection
    pub collection: String,
    /// Junction primary key
    pub primary: String,
    /// Junction column holding the parent key
    pub parent_field: String,
    /// Junction column holding the related key
    pub related_field: String,
    pub sort_field: Option<String>,
}

/// A relation resolved from one collection's point of view
#[derive(Debug, Clone, PartialEq)]
pub enum RelationInfo {
    /// The field holds a key into `related_collection`
    M2O {
        relation: Relation,
        related_collection: String,
    },
    /// The field holds a key into one of `allowed`, named by `collection_field`
    A2O {
        relation: Relation,
        allowed: Vec<String>,
        collection_field: String,
    },
    /// Rows of `relation.collection` point back through `relation.field`
    O2M { relation: Relation },
    /// Same shape as `O2M`, over a translations collection
    Translations { relation: Relation },
    /// Rows of `related_collection` reached through a junction
    M2M {
        relation: Relation,
        junction: JunctionDescriptor,
        related_collection: String,
    },
}

impl RelationInfo {
    pub fn kind(&self) -> RelationKind {
        match self {
            RelationInfo::M2O { .. } => RelationKind::M2O,
            RelationInfo::A2O { .. } => RelationKind::A2O,
            RelationInfo::O2M { .. } => RelationKind::O2M,
            RelationInfo::Translations { .. } => RelationKind::Translations,
            RelationInfo::M2M { .. } => RelationKind::M2M,
        }
    }

    pub fn relation(&self) -> &Relation {
        match self {
            RelationInfo::M2O { relation, .. }
            | RelationInfo::A2O { relation, .. }
            | RelationInfo::O2M { relation }
            | RelationInfo::Translations { relation }
            | RelationInfo::M2M { relation, .. } => relation,
        }
    }

    /// Collection whose rows end up under the field (none for any-to-one)
    pub fn target_collection(&self) -> Option<&str> {
        match self {
            RelationInfo::M2O {
                related_collection, ..
            }
            | RelationInfo::M2M {
                related_collection, ..
            } => Some(related_collection),
            RelationInfo::O2M { relation } | RelationInfo::Translations { relation } => {
                Some(&relation.collection)
            }
            RelationInfo::A2O { .. } => None,
        }
    }
}

impl SchemaOverview {
    /// Resolves `collection.field` to a relation, if it is relational
    pub fn relation_for(&self, collection: &str, field: &str) -> Option<RelationInfo> {
        for relation in &self.relations {
            if relation.collection != collection || relation.field != field {
                continue;
            }
            if let Some(related) = &relation.related_collection {
                return Some(RelationInfo::M2O {
                    relation: relation.clone(),
                    related_collection: related.clone(),
                });
            }
            if let Some(meta) = &relation.meta {
                if let (Some(allowed), Some(collection_field)) =
                    (&meta.one_allowed_collections, &meta.one_collection_field)
                {
                    return Some(RelationInfo::A2O {
                        relation: relation.clone(),
                        allowed: allowed.clone(),
                        collection_field: collection_field.clone(),
                    });
                }
            }
        }

        self.relations
            .iter()
            .find(|r| {
                r.related_collection.as_deref() == Some(collection) && r.one_field() == Some(field)
            })
            .map(|relation| self.resolve_one_side(relation, collection, field))
    }

    fn resolve_one_side(&self, relation: &Relation, collection: &str, field: &str) -> RelationInfo {
        let is_translations = self
            .collections
            .get(collection)
            .and_then(|c| c.fields.get(field))
            .map(|f| f.has_special("translations"))
            .unwrap_or(false);

        if is_translations {
            return RelationInfo::Translations {
                relation: relation.clone(),
            };
        }

        if let Some(junction_field) = relation.junction_field() {
            let other = self
                .relations
                .iter()
                .find(|r| r.collection == relation.collection && r.field == junction_field);

            if let Some(related) = other.and_then(|r| r.related_collection.clone()) {
                let primary = self
                    .collections
                    .get(&relation.collection)
                    .map(|c| c.primary.clone())
                    .unwrap_or_else(|| "id".to_string());

                return RelationInfo::M2M {
                    relation: relation.clone(),
                    junction: JunctionDescriptor {
                        collection: relation.collection.clone(),
                        primary,
                        parent_field: relation.field.clone(),
                        related_field: junction_field.to_string(),
                        sort_field: relation.sort_field().map(str::to_string),
                    },
                    related_collection: related,
                };
            }
        }

        RelationInfo::O2M {
            relation: relation.clone(),
        }
    }

    /// To-many relations exposed on `collection`, in schema declaration order
    pub fn to_many_relations(&self, collection: &str) -> Vec<(String, RelationInfo)> {
        self.relations
            .iter()
            .filter(|r| r.related_collection.as_deref() == Some(collection))
            .filter_map(|r| r.one_field().map(|f| (f.to_string(), r)))
            .map(|(field, r)| {
                let info = self.resolve_one_side(r, collection, &field);
                (field, info)
            })
            .collect()
    }

    /// Whether free-text search may descend through an alias field
    pub fn is_relation_searchable(&self, collection: &str, field: &str) -> bool {
        self.collections
            .get(collection)
            .and_then(|c| c.fields.get(field))
            .map(|f| f.searchable)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::{CollectionOverview, FieldOverview, FieldType};

    fn blog_schema() -> SchemaOverview {
        let id = || FieldOverview::new(FieldType::Integer);
        SchemaOverview::new()
            .with_collection(
                "articles",
                CollectionOverview::new("id")
                    .with_field("id", id())
                    .with_field("author", id())
                    .with_field(
                        "comments",
                        FieldOverview::new(FieldType::Alias).with_special("o2m"),
                    )
                    .with_field(
                        "tags",
                        FieldOverview::new(FieldType::Alias).with_special("m2m"),
                    )
                    .with_field(
                        "translations",
                        FieldOverview::new(FieldType::Alias).with_special("translations"),
                    ),
            )
            .with_collection("authors", CollectionOverview::new("id").with_field("id", id()))
            .with_collection(
                "comments",
                CollectionOverview::new("id")
                    .with_field("id", id())
                    .with_field("article", id()),
            )
            .with_collection("tags", CollectionOverview::new("id").with_field("id", id()))
            .with_collection(
                "articles_tags",
                CollectionOverview::new("jid")
                    .with_field("jid", id())
                    .with_field("articles_id", id())
                    .with_field("tags_id", id()),
            )
            .with_collection(
                "articles_translations",
                CollectionOverview::new("id")
                    .with_field("id", id())
                    .with_field("articles_id", id()),
            )
            .with_relation(Relation::m2o("articles", "author", "authors"))
            .with_relation(Relation::m2o("comments", "article", "articles").with_one_field("comments"))
            .with_relation(
                Relation::m2o("articles_tags", "articles_id", "articles")
                    .with_one_field("tags")
                    .with_junction_field("tags_id"),
            )
            .with_relation(
                Relation::m2o("articles_tags", "tags_id", "tags").with_junction_field("articles_id"),
            )
            .with_relation(
                Relation::m2o("articles_translations", "articles_id", "articles")
                    .with_one_field("translations"),
            )
    }

    #[test]
    fn test_m2o_resolution() {
        let schema = blog_schema();
        let info = schema.relation_for("articles", "author").unwrap();
        assert_eq!(info.kind(), RelationKind::M2O);
        assert_eq!(info.target_collection(), Some("authors"));
    }

    #[test]
    fn test_o2m_resolution() {
        let schema = blog_schema();
        let info = schema.relation_for("articles", "comments").unwrap();
        assert_eq!(info.kind(), RelationKind::O2M);
        assert_eq!(info.target_collection(), Some("comments"));
        assert_eq!(info.relation().field, "article");
    }

    #[test]
    fn test_m2m_resolution_builds_junction() {
        let schema = blog_schema();
        match schema.relation_for("articles", "tags").unwrap() {
            RelationInfo::M2M {
                junction,
                related_collection,
                ..
            } => {
                assert_eq!(related_collection, "tags");
                assert_eq!(junction.collection, "articles_tags");
                assert_eq!(junction.primary, "jid");
                assert_eq!(junction.parent_field, "articles_id");
                assert_eq!(junction.related_field, "tags_id");
            }
            other => panic!("expected m2m, got {:?}", other),
        }
    }

    #[test]
    fn test_translations_resolution() {
        let schema = blog_schema();
        let info = schema.relation_for("articles", "translations").unwrap();
        assert_eq!(info.kind(), RelationKind::Translations);
        assert_eq!(info.target_collection(), Some("articles_translations"));
    }

    #[test]
    fn test_a2o_resolution() {
        let schema = blog_schema().with_relation(Relation::a2o(
            "comments",
            "item",
            "collection",
            &["articles", "authors"],
        ));
        match schema.relation_for("comments", "item").unwrap() {
            RelationInfo::A2O {
                allowed,
                collection_field,
                ..
            } => {
                assert_eq!(allowed, vec!["articles", "authors"]);
                assert_eq!(collection_field, "collection");
            }
            other => panic!("expected a2o, got {:?}", other),
        }
    }

    #[test]
    fn test_scalar_field_is_not_relational() {
        assert!(blog_schema().relation_for("articles", "id").is_none());
    }

    #[test]
    fn test_to_many_relations_in_declaration_order() {
        let schema = blog_schema();
        let fields: Vec<String> = schema
            .to_many_relations("articles")
            .into_iter()
            .map(|(f, _)| f)
            .collect();
        assert_eq!(fields, vec!["comments", "tags", "translations"]);
    }
}
