//! Result merger
//!
//! Child rows are attached to their parents by key ([`assign`]), then the
//! whole tree is rebuilt into the requested shape ([`shape`]).

mod assign;
mod shape;
mod synthetic;

pub use assign::{
    assign_a2o, assign_to_many, assign_to_one, distinct_keys, key_of, A2OBatch, Window,
};
pub use shape::{shape_level, shape_row};
pub use synthetic::{SyntheticFields, SyntheticFn};
