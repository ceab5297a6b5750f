//! Synthetic fields
//!
//! Alias fields with no relation behind them have no column to select.
//! Their values are computed from the finished row at shape time; a field
//! with nothing registered comes out as `null`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::store::Row;

pub type SyntheticFn = Arc<dyn Fn(&Row) -> Value + Send + Sync>;

#[derive(Clone, Default)]
pub struct SyntheticFields {
    computed: HashMap<(String, String), SyntheticFn>,
}

impl SyntheticFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, collection: &str, field: &str, compute: F) -> Self
    where
        F: Fn(&Row) -> Value + Send + Sync + 'static,
    {
        self.computed.insert(
            (collection.to_string(), field.to_string()),
            Arc::new(compute),
        );
        self
    }

    pub fn contains(&self, collection: &str, field: &str) -> bool {
        self.computed
            .contains_key(&(collection.to_string(), field.to_string()))
    }

    /// Computed value for `collection.field`, if one is registered
    pub fn compute(&self, collection: &str, field: &str, row: &Row) -> Option<Value> {
        self.computed
            .get(&(collection.to_string(), field.to_string()))
            .map(|compute| compute(row))
    }
}

impl fmt::Debug for SyntheticFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .computed
            .keys()
            .map(|(collection, field)| format!("{}.{}", collection, field))
            .collect();
        keys.sort();
        f.debug_struct("SyntheticFields").field("fields", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compute_from_row() {
        let fields = SyntheticFields::new().register("articles", "thumbnail", |row| {
            json!(format!("/assets/{}", row.get("id").cloned().unwrap_or(Value::Null)))
        });
        let mut row = Row::new();
        row.insert("id".into(), json!(7));

        assert!(fields.contains("articles", "thumbnail"));
        assert_eq!(
            fields.compute("articles", "thumbnail", &row),
            Some(json!("/assets/7"))
        );
        assert_eq!(fields.compute("articles", "other", &row), None);
        assert!(format!("{:?}", fields).contains("articles.thumbnail"));
    }
}
