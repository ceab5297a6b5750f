//! Attaching fetched child rows to their parents
//!
//! Each function returns one value per parent, in parent order, computed
//! from the parents as they were before any sibling branch was attached.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::query::QuerySpec;
use crate::store::Row;

/// Comparable form of a key; numbers and their string form collapse together
pub fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Number(n) => Some(match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
            _ => n.to_string(),
        }),
        // Only canonical integer text collapses; "007" stays apart from 7
        Value::String(s) => Some(match s.parse::<i64>() {
            Ok(i) if i.to_string() == *s => i.to_string(),
            _ => s.clone(),
        }),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Distinct non-null values of `field` across `rows`, first-seen order
pub fn distinct_keys<'r>(rows: impl IntoIterator<Item = &'r Row>, field: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let Some(value) = row.get(field) else {
            continue;
        };
        if let Some(key) = key_of(value) {
            if seen.insert(key) {
                out.push(value.clone());
            }
        }
    }
    out
}

/// Per-parent slice of a nested to-many branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Window {
    /// Nested rows fall back to `default_limit` like the root does; a
    /// negative limit is unbounded. `page` wins over `offset`.
    pub fn from_query(query: &QuerySpec, default_limit: i64) -> Self {
        let limit = query.effective_limit(default_limit).map(|l| l as usize);
        let offset = query.effective_offset(default_limit).unwrap_or(0) as usize;
        Self { offset, limit }
    }

    fn apply(&self, rows: Vec<Value>) -> Vec<Value> {
        let rows = rows.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        }
    }
}

/// Many-to-one: the related row whose `related_key` equals the parent's
/// `parent_key`, or `null`
pub fn assign_to_one(
    parents: &[Row],
    parent_key: &str,
    related: &[Row],
    related_key: &str,
) -> Vec<Value> {
    let mut index: HashMap<String, &Row> = HashMap::new();
    for row in related {
        if let Some(key) = row.get(related_key).and_then(key_of) {
            index.entry(key).or_insert(row);
        }
    }

    parents
        .iter()
        .map(|parent| {
            parent
                .get(parent_key)
                .and_then(key_of)
                .and_then(|key| index.get(&key))
                .map(|row| Value::Object((*row).clone()))
                .unwrap_or(Value::Null)
        })
        .collect()
}

/// One-to-many, many-to-many and translations: every related row pointing
/// at the parent, in store order, sliced by `window`
pub fn assign_to_many(
    parents: &[Row],
    parent_key: &str,
    related: Vec<Row>,
    related_key: &str,
    window: Window,
) -> Vec<Value> {
    let mut groups: HashMap<String, Vec<Value>> = HashMap::new();
    for row in related {
        if let Some(key) = row.get(related_key).and_then(key_of) {
            groups.entry(key).or_default().push(Value::Object(row));
        }
    }

    parents
        .iter()
        .map(|parent| {
            let rows = parent
                .get(parent_key)
                .and_then(key_of)
                .and_then(|key| groups.get(&key).cloned())
                .unwrap_or_default();
            Value::Array(window.apply(rows))
        })
        .collect()
}

/// Rows fetched for one candidate collection of an any-to-one field
#[derive(Debug, Clone)]
pub struct A2OBatch {
    pub collection: String,
    pub related_key: String,
    pub rows: Vec<Row>,
}

/// Any-to-one: the discriminator picks the batch, the key picks the row
pub fn assign_a2o(
    parents: &[Row],
    parent_key: &str,
    collection_field: &str,
    batches: &[A2OBatch],
) -> Vec<Value> {
    let indexed: HashMap<&str, HashMap<String, &Row>> = batches
        .iter()
        .map(|batch| {
            let mut index = HashMap::new();
            for row in &batch.rows {
                if let Some(key) = row.get(&batch.related_key).and_then(key_of) {
                    index.entry(key).or_insert(row);
                }
            }
            (batch.collection.as_str(), index)
        })
        .collect();

    parents
        .iter()
        .map(|parent| {
            let collection = parent.get(collection_field).and_then(Value::as_str);
            let key = parent.get(parent_key).and_then(key_of);
            match (collection, key) {
                (Some(collection), Some(key)) => indexed
                    .get(collection)
                    .and_then(|index| index.get(&key))
                    .map(|row| Value::Object((*row).clone()))
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            }
        })
        .collect()
}
