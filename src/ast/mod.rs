//! Request tree
//!
//! A request is resolved into a tree before anything is compiled: one node
//! per requested column, one nested level per relational branch. The tree
//! is immutable once built and drives both compilation and merging.

mod builder;
mod node;

pub use builder::{AstBuilder, MAX_DEPTH};
pub use node::{A2OBranch, A2ONode, Ast, ChildNode, FieldNode, M2MNode, NestedNode};
