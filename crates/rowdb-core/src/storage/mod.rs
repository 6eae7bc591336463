//! Storage layer for rowdb.
//!
//! Each table is one JSON document under `<root>/<database>/<table>.json`,
//! read and written whole.

mod config;
mod hash_index;
mod store;

pub use config::StoreConfig;
pub use hash_index::IndexManager;
pub use store::{validate_name, Snapshot, TableStore};
