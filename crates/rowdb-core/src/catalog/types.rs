//! Column type tags.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag of a column.
///
/// Serialized in lowercase canonical form. Common aliases are accepted when
/// reading schemas (`string`, `integer`, `number`, `bool`, `date`, `datetime`,
/// `object`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// UTF-8 string.
    #[serde(alias = "string")]
    Text,
    /// Integer-valued number.
    #[serde(alias = "integer")]
    Int,
    /// Any finite number.
    #[serde(alias = "number")]
    Float,
    /// Boolean value.
    #[serde(alias = "bool")]
    Boolean,
    /// Canonical 8-4-4-4-12 hex UUID string.
    Uuid,
    /// RFC 3339 string or epoch milliseconds.
    #[serde(alias = "date", alias = "datetime")]
    Timestamp,
    /// Structured value: object, array, or a string holding JSON.
    #[serde(alias = "object")]
    Json,
}

impl ColumnType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Int | ColumnType::Float)
    }

    /// Check if this type is stored as a string.
    pub fn is_string_like(&self) -> bool {
        matches!(self, ColumnType::Text | ColumnType::Uuid)
    }

    /// Canonical tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Uuid => "uuid",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Json => "json",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
