//! rowdb Core - embedded, schema-validated table engine.
//!
//! Each table is one self-describing unit of schema, relationships, rows and
//! index metadata, persisted as a single JSON document. The [`Session`] is the
//! entry point for every table operation.

pub mod catalog;
pub mod constraint;
pub mod error;
pub mod migration;
pub mod query;
pub mod security;
pub mod session;
pub mod storage;

pub use catalog::{
    ColumnDef, ColumnType, DefaultValue, EncryptionOptions, Generator, IndexDef, IndexKind,
    IndexOptions, RelationDef, Row, TableOptions, TableUnit,
};
pub use constraint::{CascadeEffect, RelationshipEnforcer, SchemaValidator};
pub use error::Error;
pub use migration::{MigrationReport, MigrationRunner};
pub use query::{
    Filter, JoinSpec, JoinType, Operator, OrderBy, QueryExecutor, SelectQuery, SortDirection,
};
pub use session::{DeleteOptions, DeleteReport, InsertOptions, Session, UpdateReport};
pub use storage::{Snapshot, StoreConfig, TableStore};

// Security exports
pub use security::{decrypt_field, encrypt_field, FieldCipher, RowCipher};
