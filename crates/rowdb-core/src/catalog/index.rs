//! Index definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of auxiliary index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Definition only, no lookup data.
    #[default]
    Value,
    /// Field value to row positions.
    Hash,
}

/// Options accepted when declaring an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    /// Index kind.
    #[serde(alias = "type")]
    pub kind: IndexKind,
    /// Whether the indexed values must be distinct.
    pub unique: bool,
}

impl IndexOptions {
    /// Hash index options.
    pub fn hash() -> Self {
        Self {
            kind: IndexKind::Hash,
            unique: false,
        }
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A declared index, optionally carrying precomputed hash data.
///
/// The data reflects the rows present when the index was built and is not
/// refreshed by later writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Indexed field.
    pub field: String,
    /// Index kind.
    #[serde(alias = "type")]
    pub kind: IndexKind,
    /// Uniqueness flag.
    #[serde(default)]
    pub unique: bool,
    /// Index key to row positions, for hash indexes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<String, Vec<usize>>>,
}

impl IndexDef {
    /// Create a definition with no data.
    pub fn new(field: impl Into<String>, options: IndexOptions) -> Self {
        Self {
            field: field.into(),
            kind: options.kind,
            unique: options.unique,
            data: None,
        }
    }

    /// Row positions recorded for an index key.
    pub fn positions(&self, key: &str) -> Option<&[usize]> {
        self.data.as_ref()?.get(key).map(|v| v.as_slice())
    }
}
