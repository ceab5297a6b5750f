//! Schema overview types
//!
//! A read-only description of collections, fields and relations. Field maps
//! are insertion ordered so that declaration order survives loading.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Column type as declared in the schema overview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    String,
    Text,
    Integer,
    BigInteger,
    Float,
    Decimal,
    Boolean,
    Uuid,
    Json,
    Csv,
    Date,
    DateTime,
    Time,
    Timestamp,
    Hash,
    Alias,
    #[serde(other)]
    Unknown,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::BigInteger => "bigInteger",
            FieldType::Float => "float",
            FieldType::Decimal => "decimal",
            FieldType::Boolean => "boolean",
            FieldType::Uuid => "uuid",
            FieldType::Json => "json",
            FieldType::Csv => "csv",
            FieldType::Date => "date",
            FieldType::DateTime => "dateTime",
            FieldType::Time => "time",
            FieldType::Timestamp => "timestamp",
            FieldType::Hash => "hash",
            FieldType::Alias => "alias",
            FieldType::Unknown => "unknown",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::BigInteger | FieldType::Float | FieldType::Decimal
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::BigInteger)
    }

    /// Free-text columns: the ones searched with a substring match
    pub fn is_text(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Text)
    }

    /// Columns that accept the string operators (`_contains`, `_starts_with`, ...)
    pub fn supports_string_ops(&self) -> bool {
        matches!(
            self,
            FieldType::String
                | FieldType::Text
                | FieldType::Uuid
                | FieldType::Hash
                | FieldType::Json
                | FieldType::Csv
                | FieldType::Unknown
        )
    }

    /// Columns that accept range operators
    pub fn is_ordered(&self) -> bool {
        self.is_numeric() || self.is_temporal() || self.is_text() || *self == FieldType::Unknown
    }

    pub fn is_temporal(&self) -> bool {
        self.has_date_part() || self.has_time_part()
    }

    pub fn has_date_part(&self) -> bool {
        matches!(
            self,
            FieldType::Date | FieldType::DateTime | FieldType::Timestamp
        )
    }

    pub fn has_time_part(&self) -> bool {
        matches!(
            self,
            FieldType::Time | FieldType::DateTime | FieldType::Timestamp
        )
    }
}

fn default_true() -> bool {
    true
}

/// Field description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOverview {
    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default = "default_true")]
    pub nullable: bool,

    /// Special flags (`o2m`, `m2m`, `translations`, `cast-boolean`, `conceal`, ...)
    #[serde(default)]
    pub special: Vec<String>,

    /// Whether free-text search may look at this field
    #[serde(default = "default_true")]
    pub searchable: bool,
}

impl FieldOverview {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            nullable: true,
            special: Vec::new(),
            searchable: true,
        }
    }

    pub fn with_special(mut self, special: &str) -> Self {
        self.special.push(special.to_string());
        self
    }

    pub fn not_searchable(mut self) -> Self {
        self.searchable = false;
        self
    }

    pub fn has_special(&self, flag: &str) -> bool {
        self.special.iter().any(|s| s == flag)
    }

    /// Fields with no backing column
    pub fn is_alias(&self) -> bool {
        self.field_type == FieldType::Alias
            || self.special.iter().any(|s| {
                matches!(
                    s.as_str(),
                    "o2m" | "m2m" | "m2a" | "translations" | "alias" | "no-data" | "group"
                )
            })
    }
}

/// Collection description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionOverview {
    /// Primary key field
    pub primary: String,

    #[serde(default)]
    pub singleton: bool,

    pub fields: IndexMap<String, FieldOverview>,
}

impl CollectionOverview {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            singleton: false,
            fields: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, field: FieldOverview) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    /// Fields that are backed by a column, in declaration order
    pub fn column_fields(&self) -> impl Iterator<Item = (&String, &FieldOverview)> {
        self.fields.iter().filter(|(_, f)| !f.is_alias())
    }
}

/// Relation metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationMeta {
    /// Alias field on the "one" side listing the related rows
    #[serde(default)]
    pub one_field: Option<String>,

    /// For junction relations: the junction column pointing at the other side
    #[serde(default)]
    pub junction_field: Option<String>,

    /// For any-to-one relations: the candidate collections
    #[serde(default)]
    pub one_allowed_collections: Option<Vec<String>>,

    /// For any-to-one relations: the column naming the related collection
    #[serde(default)]
    pub one_collection_field: Option<String>,

    #[serde(default)]
    pub sort_field: Option<String>,
}

/// Relation between two collections
///
/// `collection.field` holds the foreign key. `related_collection` is `None`
/// for any-to-one relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub collection: String,
    pub field: String,
    #[serde(default)]
    pub related_collection: Option<String>,
    #[serde(default)]
    pub meta: Option<RelationMeta>,
}

impl Relation {
    /// Many-to-one relation without an alias on the other side
    pub fn m2o(
        collection: impl Into<String>,
        field: impl Into<String>,
        related_collection: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            related_collection: Some(related_collection.into()),
            meta: None,
        }
    }

    /// Adds the alias field exposed on the related collection
    pub fn with_one_field(mut self, one_field: impl Into<String>) -> Self {
        self.meta.get_or_insert_with(RelationMeta::default).one_field = Some(one_field.into());
        self
    }

    pub fn with_junction_field(mut self, junction_field: impl Into<String>) -> Self {
        self.meta
            .get_or_insert_with(RelationMeta::default)
            .junction_field = Some(junction_field.into());
        self
    }

    pub fn with_sort_field(mut self, sort_field: impl Into<String>) -> Self {
        self.meta.get_or_insert_with(RelationMeta::default).sort_field = Some(sort_field.into());
        self
    }

    /// Any-to-one relation
    pub fn a2o(
        collection: impl Into<String>,
        field: impl Into<String>,
        collection_field: impl Into<String>,
        allowed: &[&str],
    ) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            related_collection: None,
            meta: Some(RelationMeta {
                one_allowed_collections: Some(allowed.iter().map(|s| s.to_string()).collect()),
                one_collection_field: Some(collection_field.into()),
                ..RelationMeta::default()
            }),
        }
    }

    pub fn one_field(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.one_field.as_deref())
    }

    pub fn junction_field(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.junction_field.as_deref())
    }

    pub fn sort_field(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.sort_field.as_deref())
    }
}

/// Read-only schema snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaOverview {
    #[serde(default)]
    pub collections: IndexMap<String, CollectionOverview>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl SchemaOverview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, name: impl Into<String>, collection: CollectionOverview) -> Self {
        self.collections.insert(name.into(), collection);
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Looks up a collection, failing with `SchemaMismatch`
    pub fn collection(&self, name: &str) -> EngineResult<&CollectionOverview> {
        self.collections
            .get(name)
            .ok_or_else(|| EngineError::unknown_collection(name))
    }

    /// Looks up a field, failing with `SchemaMismatch`
    pub fn field(&self, collection: &str, field: &str) -> EngineResult<&FieldOverview> {
        self.collection(collection)?
            .fields
            .get(field)
            .ok_or_else(|| EngineError::unknown_field(collection, field))
    }

    pub fn primary_key(&self, collection: &str) -> EngineResult<&str> {
        Ok(self.collection(collection)?.primary.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_keeps_field_order() {
        let collection: CollectionOverview = serde_json::from_value(json!({
            "primary": "id",
            "fields": {
                "id": {"type": "integer", "nullable": false},
                "zeta": {"type": "string"},
                "alpha": {"type": "dateTime"}
            }
        }))
        .unwrap();

        let names: Vec<&str> = collection.fields.keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["id", "zeta", "alpha"]);
        assert_eq!(collection.fields["alpha"].field_type, FieldType::DateTime);
        assert!(collection.fields["zeta"].searchable);
        assert!(!collection.singleton);
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let field: FieldOverview =
            serde_json::from_value(json!({"type": "geometry.Point"})).unwrap();
        assert_eq!(field.field_type, FieldType::Unknown);
    }

    #[test]
    fn test_alias_detection() {
        assert!(FieldOverview::new(FieldType::Alias).is_alias());
        assert!(FieldOverview::new(FieldType::Unknown)
            .with_special("o2m")
            .is_alias());
        assert!(!FieldOverview::new(FieldType::String).is_alias());
    }

    #[test]
    fn test_missing_field_is_schema_mismatch() {
        let schema = SchemaOverview::new().with_collection(
            "articles",
            CollectionOverview::new("id").with_field("id", FieldOverview::new(FieldType::Integer)),
        );
        assert!(schema.field("articles", "id").is_ok());
        assert_eq!(
            schema.field("articles", "title").unwrap_err().code().code(),
            "QUERY_SCHEMA_MISMATCH"
        );
        assert!(schema.collection("nope").is_err());
    }
}
