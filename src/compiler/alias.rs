//! Alias bookkeeping for one compiled level

use std::collections::BTreeMap;

use serde_json::Value;

use super::clause::Placeholder;

/// Generated table aliases and select aliases of one clause set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    /// Relation path -> table alias
    joins: BTreeMap<String, String>,
    /// Table alias -> relation path
    tables: BTreeMap<String, String>,
    /// Select alias -> output path
    outputs: BTreeMap<String, Vec<String>>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_join(&mut self, path: impl Into<String>, alias: impl Into<String>) {
        let path = path.into();
        let alias = alias.into();
        self.tables.insert(alias.clone(), path.clone());
        self.joins.insert(path, alias);
    }

    pub fn alias_for_path(&self, path: &str) -> Option<&str> {
        self.joins.get(path).map(String::as_str)
    }

    pub fn path_for_alias(&self, alias: &str) -> Option<&str> {
        self.tables.get(alias).map(String::as_str)
    }

    pub fn insert_output(&mut self, select_alias: impl Into<String>, path: Vec<String>) {
        self.outputs.insert(select_alias.into(), path);
    }

    /// Output path of a select alias; `sum->price` maps to `["sum", "price"]`
    pub fn output_path(&self, select_alias: &str) -> Option<&[String]> {
        self.outputs.get(select_alias).map(Vec::as_slice)
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.outputs.iter()
    }

    pub fn join_count(&self) -> usize {
        self.joins.len()
    }
}

/// Where a predicate is being compiled: a collection under a table alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Scope {
    pub collection: String,
    pub alias: String,
    /// Relation path used to key joins made from this scope
    pub path: String,
}

impl Scope {
    pub fn root(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            alias: collection.to_string(),
            path: String::new(),
        }
    }

    pub fn child(&self, collection: &str, alias: &str, segment: &str) -> Self {
        Self {
            collection: collection.to_string(),
            alias: alias.to_string(),
            path: self.join_path(segment),
        }
    }

    pub fn join_path(&self, segment: &str) -> String {
        if self.path.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{}", self.path, segment)
        }
    }
}

/// Shared state while compiling one level.
///
/// Placeholders and generated aliases are monotonic across every nested
/// sub-select of the level, so the rendered markers line up with
/// `bindings`.
#[derive(Debug, Default)]
pub(crate) struct ClauseBuilder {
    pub bindings: Vec<Value>,
    pub aliases: AliasMap,
    next_join: usize,
    next_sub: usize,
}

impl ClauseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, value: Value) -> Placeholder {
        self.bindings.push(value);
        Placeholder(self.bindings.len() - 1)
    }

    pub fn join_alias(&mut self) -> String {
        let alias = format!("__j{}", self.next_join);
        self.next_join += 1;
        alias
    }

    pub fn sub_alias(&mut self) -> String {
        let alias = format!("__s{}", self.next_sub);
        self.next_sub += 1;
        alias
    }
}
