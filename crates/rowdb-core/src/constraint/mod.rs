//! Constraint enforcement module.
//!
//! - Column constraints (type, required, unique, bounds, length, pattern)
//! - Foreign key references between tables
//! - Cascading deletes

mod references;
mod validator;

pub use references::{CascadeEffect, CascadePlan, RelationshipEnforcer};
pub use validator::{type_accepts, SchemaValidator};
