//! Relational search expansion

mod expander;

pub use expander::{SearchExpander, SearchPredicate};
