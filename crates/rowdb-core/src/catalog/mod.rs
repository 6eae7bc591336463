//! Table catalog types.
//!
//! Column, relationship and index definitions plus the persisted table unit
//! that carries them together with the rows.

mod column;
mod index;
mod relation;
mod table;
mod types;

pub use column::{ColumnDef, DefaultValue, Generator};
pub use index::{IndexDef, IndexKind, IndexOptions};
pub use relation::RelationDef;
pub use table::{
    EncryptionOptions, TableOptions, TableUnit, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD,
};
pub use types::ColumnType;

pub(crate) use column::now_iso;
pub(crate) use table::check_column;

/// One record: column name to value, in insertion order.
pub type Row = serde_json::Map<String, serde_json::Value>;
