//! Query engine for rowdb.
//!
//! Operates only on rows that are already loaded and decrypted; the
//! pipeline order is fixed: filter, join, sort, paginate, project.

pub mod compare;
mod executor;
mod filter;
mod join;

pub use executor::{project, sort_rows, OrderBy, QueryExecutor, SelectQuery, SortDirection};
pub use filter::{Condition, Filter, FilterEvaluator, Operator};
pub use join::{apply_joins, JoinOn, JoinSource, JoinSpec, JoinType};
