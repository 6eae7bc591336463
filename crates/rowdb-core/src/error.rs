//! Core error types.

use thiserror::Error;

/// Core engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// One or more constraint violations for a single row.
    ///
    /// All violations found for the row are reported together.
    #[error("validation failed for table '{table}': {}", violations.join("; "))]
    Validation {
        /// Table the row was destined for.
        table: String,
        /// Every violation message, each prefixed with its field name.
        violations: Vec<String>,
    },

    /// A table with this name already exists in the database.
    #[error("table '{0}' already exists")]
    TableExists(String),

    /// The table does not exist in the database.
    #[error("table '{0}' not found")]
    TableNotFound(String),

    /// A referenced row does not exist in the foreign table.
    #[error(
        "foreign key violation: {table}.{field} = {value} has no match in {foreign_table}.{foreign_key}"
    )]
    ForeignKeyViolation {
        /// Table holding the reference.
        table: String,
        /// Local field holding the reference.
        field: String,
        /// Referenced table.
        foreign_table: String,
        /// Referenced field.
        foreign_key: String,
        /// The dangling value.
        value: String,
    },

    /// No database has been selected on the session.
    #[error("no database selected")]
    DatabaseNotSelected,

    /// The column is already declared.
    #[error("column '{column}' already exists in table '{table}'")]
    ColumnExists {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// The column is not declared.
    #[error("column '{column}' not found in table '{table}'")]
    ColumnNotFound {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A schema definition is malformed.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// A query document or filter is malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A database or table name is not usable as a path component.
    #[error("invalid name: '{0}'")]
    InvalidName(String),

    /// The persisted unit changed between load and commit.
    #[error("table '{0}' was modified concurrently")]
    ConcurrentModification(String),

    /// A batched insert stopped partway; completed items stay persisted.
    #[error("batch insert stopped after {completed} of {attempted} rows: {source}")]
    BatchIncomplete {
        /// Rows inserted and persisted before the failure.
        completed: usize,
        /// Rows in the batch.
        attempted: usize,
        /// The failure that stopped the batch.
        #[source]
        source: Box<Error>,
    },

    /// A cascading delete stopped partway; completed tables stay modified.
    #[error("cascade stopped after {completed} of {attempted} tables: {source}")]
    CascadeIncomplete {
        /// Dependent tables already persisted.
        completed: usize,
        /// Dependent tables that needed changes.
        attempted: usize,
        /// The failure that stopped the cascade.
        #[source]
        source: Box<Error>,
    },

    /// Field encryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a validation error from a violation list.
    pub fn validation(table: impl Into<String>, violations: Vec<String>) -> Self {
        Error::Validation {
            table: table.into(),
            violations,
        }
    }

    /// Violation messages if this is a validation error.
    pub fn violations(&self) -> &[String] {
        match self {
            Error::Validation { violations, .. } => violations,
            _ => &[],
        }
    }
}
