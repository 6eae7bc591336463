//! Relationship definitions between tables.

use serde::{Deserialize, Serialize};

/// A many-to-one reference from a local field to a foreign table's key.
///
/// Keyed by the local field name in the table's relationship map. Enforced
/// when rows are written; never materialized as a stored join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDef {
    /// Referenced table.
    pub foreign_table: String,
    /// Referenced field on the foreign table (usually `id`).
    pub foreign_key: String,
}

impl RelationDef {
    /// Create a relation to `foreign_table.foreign_key`.
    pub fn new(foreign_table: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            foreign_table: foreign_table.into(),
            foreign_key: foreign_key.into(),
        }
    }

    /// Create a relation to the `id` of `foreign_table`.
    pub fn to_id(foreign_table: impl Into<String>) -> Self {
        Self::new(foreign_table, "id")
    }

    /// Check if this relation points at the given table.
    pub fn references(&self, table: &str) -> bool {
        self.foreign_table == table
    }
}
