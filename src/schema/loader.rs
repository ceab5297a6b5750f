//! Schema overview loader
//!
//! Reads a schema overview JSON document and checks its internal
//! references before handing it to the engine. A schema that references
//! unknown collections or primary keys is rejected as malformed.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::observability::Event;

use super::types::SchemaOverview;

/// Loads and validates schema overview documents
pub struct SchemaLoader;

impl SchemaLoader {
    /// Loads a schema overview from a JSON file.
    pub fn load_file(path: &Path) -> EngineResult<SchemaOverview> {
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::malformed_schema(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let schema = Self::parse(&content).map_err(|e| match e {
            EngineError::MalformedSchema(msg) => {
                EngineError::malformed_schema(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;

        debug!(
            event = Event::SchemaLoaded.as_str(),
            path = %path.display(),
            collections = schema.collections.len(),
            relations = schema.relations.len(),
        );
        Ok(schema)
    }

    /// Parses and validates a schema overview from JSON text.
    pub fn parse(content: &str) -> EngineResult<SchemaOverview> {
        let schema: SchemaOverview = serde_json::from_str(content)
            .map_err(|e| EngineError::malformed_schema(format!("Invalid JSON: {}", e)))?;
        Self::validate(&schema)?;
        Ok(schema)
    }

    /// Checks primary keys and relation endpoints.
    pub fn validate(schema: &SchemaOverview) -> EngineResult<()> {
        for (name, collection) in &schema.collections {
            if !collection.fields.contains_key(&collection.primary) {
                return Err(EngineError::malformed_schema(format!(
                    "primary key \"{}\" of collection \"{}\" is not a declared field",
                    collection.primary, name
                )));
            }
        }

        for relation in &schema.relations {
            if !schema.collections.contains_key(&relation.collection) {
                return Err(EngineError::malformed_schema(format!(
                    "relation {}.{} starts from unknown collection",
                    relation.collection, relation.field
                )));
            }

            if let Some(related) = &relation.related_collection {
                if !schema.collections.contains_key(related) {
                    return Err(EngineError::malformed_schema(format!(
                        "relation {}.{} points to unknown collection \"{}\"",
                        relation.collection, relation.field, related
                    )));
                }
            } else {
                let allowed = relation
                    .meta
                    .as_ref()
                    .and_then(|m| m.one_allowed_collections.as_ref());
                let Some(allowed) = allowed else {
                    return Err(EngineError::malformed_schema(format!(
                        "relation {}.{} has neither a related collection nor allowed collections",
                        relation.collection, relation.field
                    )));
                };
                if let Some(unknown) = allowed
                    .iter()
                    .find(|c| !schema.collections.contains_key(c.as_str()))
                {
                    return Err(EngineError::malformed_schema(format!(
                        "relation {}.{} allows unknown collection \"{}\"",
                        relation.collection, relation.field, unknown
                    )));
                }
            }
        }

        Ok(())
    }
}
