//! Permission filter injection
//!
//! Permissions never raise errors. A collection the caller may not read
//! resolves to [`PermissionOutcome::DeniedAll`], which the compiler turns
//! into an always-false predicate, so denial looks exactly like "no
//! matching rows".

mod resolver;
mod rules;

pub use resolver::{PermissionOutcome, PermissionResolver, RuleAccess};
pub use rules::{Accountability, Action, FieldAccess, PermissionRule};
