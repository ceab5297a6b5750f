//! Declarative query input
//!
//! Filter trees, per-level query specs, sort and aggregate descriptors, and
//! field function references. Everything here is immutable once parsed.

mod filter;
mod functions;
mod spec;

pub use filter::{Filter, FilterOperator, Quantifier};
pub use functions::{FieldFunction, FieldRef};
pub use spec::{AggregateFunction, AggregateSpec, QuerySpec, SortDirection, SortSpec};
