//! Query compiler
//!
//! Compiles one level of an abstract query into an executable clause set:
//! select list, joins, a predicate tree over placeholders, order, group and
//! pagination. Permission predicates and search expansion are folded into
//! the predicate tree here, so every clause set leaving this module is
//! already restricted to what the caller may see.

mod alias;
mod clause;
mod compiler;
mod explain;
mod filter;
mod render;

pub use alias::AliasMap;
pub use clause::{
    ClauseSet, ColumnRef, CompareOp, Join, JoinKind, Operand, OrderItem, Placeholder, Predicate,
    SelectExpr, SelectItem, SubQuery, TableRef,
};
pub use compiler::{
    key_alias, CompiledLevel, KeyConstraint, LevelRequest, QueryCompiler, Selection,
    JUNCTION_PARENT_KEY,
};
pub use explain::ExplainPlan;
pub use render::{quote_ident, render, render_predicate};

pub(crate) use alias::{ClauseBuilder, Scope};
pub(crate) use filter::FilterCompiler;
