//! In-memory row store
//!
//! Evaluates clause sets directly against rows held in memory. Every
//! statement is recorded, so callers can count round trips and inspect
//! exactly what the engine issued.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::trace;

use super::eval::Evaluator;
use super::{FetchFuture, Row, RowStore, RowStoreError, Statement};

#[derive(Debug, Default)]
pub struct MemoryRowStore {
    tables: HashMap<String, Vec<Row>>,
    failing: HashSet<String>,
    statements: Mutex<Vec<Statement>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the rows of one collection
    pub fn with_rows(mut self, collection: impl Into<String>, rows: Vec<Row>) -> Self {
        self.tables.insert(collection.into(), rows);
        self
    }

    /// Makes every statement against `collection` fail
    pub fn fail_on(mut self, collection: impl Into<String>) -> Self {
        self.failing.insert(collection.into());
        self
    }

    /// Number of statements issued so far
    pub fn round_trips(&self) -> usize {
        self.lock().len()
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.lock().clone()
    }

    pub fn statements_for(&self, collection: &str) -> Vec<Statement> {
        self.lock()
            .iter()
            .filter(|s| s.collection == collection)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Statement>> {
        self.statements
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RowStore for MemoryRowStore {
    fn fetch<'a>(&'a self, statement: &'a Statement) -> FetchFuture<'a> {
        Box::pin(async move {
            self.lock().push(statement.clone());
            trace!(collection = %statement.collection, sql = %statement.sql, "memory fetch");

            // Let sibling fetches interleave the way real I/O would
            tokio::task::yield_now().await;

            if self.failing.contains(&statement.collection) {
                return Err(RowStoreError::query(format!(
                    "statement against \"{}\" failed",
                    statement.collection
                )));
            }

            Ok(Evaluator::new(&self.tables, &statement.clauses.bindings).execute(&statement.clauses))
        })
    }
}
