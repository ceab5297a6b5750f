//! Row store boundary
//!
//! The engine never talks to a database directly. Each compiled level is
//! rendered into a [`Statement`] and handed to a [`RowStore`], which returns
//! plain rows keyed by select alias.

mod eval;
mod memory;

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::compiler::{render, ClauseSet};

pub use memory::MemoryRowStore;

/// One decoded row, keyed by select alias
pub type Row = Map<String, Value>;

/// Row store result type
pub type RowStoreResult<T> = Result<T, RowStoreError>;

/// Boxed future returned by [`RowStore::fetch`]
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = RowStoreResult<Vec<Row>>> + Send + 'a>>;

/// Failure reported by a row store
#[derive(Debug, Clone, Error)]
pub enum RowStoreError {
    #[error("Row store query failed: {0}")]
    Query(String),

    #[error("Row store unavailable: {0}")]
    Unavailable(String),
}

impl RowStoreError {
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// A level's query, ready for the store
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub collection: String,
    pub clauses: ClauseSet,
    /// Rendered SQL with `?` markers
    pub sql: String,
    /// Values for the markers, in marker order
    pub bindings: Vec<Value>,
}

impl Statement {
    pub fn new(clauses: ClauseSet) -> Self {
        let (sql, bindings) = render(&clauses);
        Self {
            collection: clauses.from.collection.clone(),
            clauses,
            sql,
            bindings,
        }
    }
}

/// Executes statements against whatever holds the rows
pub trait RowStore: Send + Sync {
    fn fetch<'a>(&'a self, statement: &'a Statement) -> FetchFuture<'a>;
}

impl<S: RowStore + ?Sized> RowStore for std::sync::Arc<S> {
    fn fetch<'a>(&'a self, statement: &'a Statement) -> FetchFuture<'a> {
        (**self).fetch(statement)
    }
}
