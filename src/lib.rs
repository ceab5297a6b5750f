//! nestquery - permission-aware compiler and batched executor for nested
//! relational queries
//!
//! A request names a root collection and a tree of fields reaching through
//! relations. The engine:
//!
//! 1. Builds a request tree ([`ast`]) checked against the schema overview
//! 2. Compiles each level into a clause set ([`compiler`]) with permission
//!    predicates ([`permissions`]) and relational search ([`search`]) folded in
//! 3. Executes levels against a [`store::RowStore`] in parent-key batches
//!    ([`executor`])
//! 4. Attaches child rows to their parents and shapes the output ([`merge`])

pub mod ast;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod merge;
pub mod observability;
pub mod permissions;
pub mod query;
pub mod schema;
pub mod search;
pub mod store;

#[cfg(test)]
pub(crate) mod fixtures;

pub use error::{EngineError, EngineErrorCode, EngineResult};
