//! Relational executor
//!
//! Consumes request trees and produces nested result values.
//!
//! # Execution flow
//!
//! 1. Compile and fetch the root level
//! 2. Return early on an empty root
//! 3. Fetch each relational branch in parent-key chunks, siblings concurrently
//! 4. Coerce decoded values by field type
//! 5. Attach branch values to parents, then shape the output
//!
//! # Guarantees
//!
//! - A branch with no parent keys issues no query
//! - `N` parent keys cost `ceil(N / batch size)` round trips per branch
//! - Any branch failure fails the whole request

mod executor;
mod state;
mod transform;

pub use executor::RelationalExecutor;
pub use state::BranchState;
pub use transform::{coerce_value, nest_outputs, MASK};
