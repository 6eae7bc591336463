//! The persisted table unit and its options.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::column::{now_iso, ColumnDef};
use super::index::IndexDef;
use super::relation::RelationDef;
use super::Row;
use crate::error::Error;

/// Name of the implicit primary column.
pub const ID_FIELD: &str = "id";
/// Row creation stamp written when timestamps are enabled.
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Row modification stamp written when timestamps are enabled.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Field-level encryption settings.
///
/// Serializes to `{}` when encryption is not configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionOptions {
    /// Caller-supplied key material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Fields stored as ciphertext.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

impl EncryptionOptions {
    /// Encrypt `fields` with `key`.
    pub fn new<I, S>(key: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: Some(key.into()),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether any field is encrypted.
    pub fn is_enabled(&self) -> bool {
        self.key.is_some() && !self.fields.is_empty()
    }

    /// Whether `field` is stored encrypted.
    pub fn covers(&self, field: &str) -> bool {
        self.key.is_some() && self.fields.iter().any(|f| f == field)
    }
}

/// Table-wide options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOptions {
    /// Field encryption settings.
    #[serde(default)]
    pub encryption: EncryptionOptions,
    /// Stamp rows with `createdAt`/`updatedAt`.
    #[serde(default)]
    pub timestamps: bool,
}

impl TableOptions {
    /// Enable row timestamps.
    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    /// Configure field encryption.
    pub fn with_encryption(mut self, encryption: EncryptionOptions) -> Self {
        self.encryption = encryption;
        self
    }
}

/// Full serialized state of one table: schema, relationships, rows, indexes
/// and options travel together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableUnit {
    /// Table name.
    pub name: String,
    /// Creation time, ISO-8601.
    pub created_at: String,
    /// Declared columns in declaration order.
    pub columns: IndexMap<String, ColumnDef>,
    /// Local field to foreign reference.
    #[serde(default)]
    pub relationships: IndexMap<String, RelationDef>,
    /// Stored rows; encrypted fields hold tagged ciphertext.
    #[serde(default)]
    pub rows: Vec<Row>,
    /// Field to index definition.
    #[serde(default)]
    pub indexes: IndexMap<String, IndexDef>,
    /// Table options.
    #[serde(default)]
    pub options: TableOptions,
}

impl TableUnit {
    /// Build a new, empty table unit.
    ///
    /// Adds the implicit `id` column when it is not declared and the
    /// timestamp columns when stamping is enabled, then checks that the
    /// definitions are coherent.
    pub fn new(
        name: impl Into<String>,
        mut columns: IndexMap<String, ColumnDef>,
        relationships: IndexMap<String, RelationDef>,
        options: TableOptions,
    ) -> Result<Self, Error> {
        if !columns.contains_key(ID_FIELD) {
            columns.shift_insert(0, ID_FIELD.to_string(), ColumnDef::implicit_id());
        }
        if options.timestamps {
            for field in [CREATED_AT_FIELD, UPDATED_AT_FIELD] {
                columns
                    .entry(field.to_string())
                    .or_insert_with(ColumnDef::timestamp);
            }
        }

        let unit = Self {
            name: name.into(),
            created_at: now_iso(),
            columns,
            relationships,
            rows: Vec::new(),
            indexes: IndexMap::new(),
            options,
        };
        unit.check_definitions()?;
        Ok(unit)
    }

    /// Verify that the schema is internally consistent.
    pub fn check_definitions(&self) -> Result<(), Error> {
        let mut problems = Vec::new();

        for (name, col) in &self.columns {
            check_column(name, col, &mut problems);
        }
        for field in self.relationships.keys() {
            if !self.columns.contains_key(field) {
                problems.push(format!("relationship on undeclared field '{}'", field));
            }
        }
        if self.options.encryption.key.is_none() && !self.options.encryption.fields.is_empty() {
            problems.push("encrypted fields listed without a key".to_string());
        }
        for field in &self.options.encryption.fields {
            if field == ID_FIELD {
                problems.push("'id' cannot be encrypted".to_string());
            } else if !self.columns.contains_key(field) {
                problems.push(format!("encrypted field '{}' is not declared", field));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidSchema(problems.join("; ")))
        }
    }

    /// Copy of the unit without rows.
    pub fn describe(&self) -> Self {
        Self {
            rows: Vec::new(),
            ..self.clone()
        }
    }

    /// Look up a column, failing with `ColumnNotFound`.
    pub fn column(&self, name: &str) -> Result<&ColumnDef, Error> {
        self.columns.get(name).ok_or_else(|| Error::ColumnNotFound {
            table: self.name.clone(),
            column: name.to_string(),
        })
    }
}

/// Check one column definition for internal consistency.
pub(crate) fn check_column(name: &str, col: &ColumnDef, problems: &mut Vec<String>) {
    if name.is_empty() {
        problems.push("column name must not be empty".to_string());
    }
    if (col.min.is_some() || col.max.is_some()) && !col.column_type.is_numeric() {
        problems.push(format!("{}: min/max need a numeric column", name));
    }
    if (col.min_length.is_some() || col.max_length.is_some() || col.pattern.is_some())
        && !col.column_type.is_string_like()
    {
        problems.push(format!("{}: length and pattern need a string column", name));
    }
    if let (Some(min), Some(max)) = (col.min, col.max) {
        if min > max {
            problems.push(format!("{}: min {} exceeds max {}", name, min, max));
        }
    }
    if let (Some(min), Some(max)) = (col.min_length, col.max_length) {
        if min > max {
            problems.push(format!("{}: minLength {} exceeds maxLength {}", name, min, max));
        }
    }
    if let Some(pattern) = &col.pattern {
        if let Err(e) = regex::Regex::new(pattern) {
            problems.push(format!("{}: invalid pattern: {}", name, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns(defs: &[(&str, ColumnDef)]) -> IndexMap<String, ColumnDef> {
        defs.iter()
            .map(|(n, c)| (n.to_string(), c.clone()))
            .collect()
    }

    #[test]
    fn test_implicit_id_comes_first() {
        let unit = TableUnit::new(
            "t",
            columns(&[("name", ColumnDef::text().required())]),
            IndexMap::new(),
            TableOptions::default(),
        )
        .unwrap();

        let names: Vec<_> = unit.columns.keys().cloned().collect();
        assert_eq!(names, vec!["id", "name"]);
        assert!(unit.columns["id"].required);
    }

    #[test]
    fn test_caller_defined_id_is_kept() {
        let unit = TableUnit::new(
            "t",
            columns(&[("id", ColumnDef::text().required())]),
            IndexMap::new(),
            TableOptions::default(),
        )
        .unwrap();
        assert_eq!(unit.columns["id"], ColumnDef::text().required());
    }

    #[test]
    fn test_timestamp_columns_declared() {
        let unit = TableUnit::new(
            "t",
            IndexMap::new(),
            IndexMap::new(),
            TableOptions::default().with_timestamps(),
        )
        .unwrap();
        assert!(unit.columns.contains_key(CREATED_AT_FIELD));
        assert!(unit.columns.contains_key(UPDATED_AT_FIELD));
    }

    #[test]
    fn test_incoherent_definitions_rejected() {
        let result = TableUnit::new(
            "t",
            columns(&[("age", ColumnDef::int().min(10.0).max(1.0))]),
            [("owner".to_string(), RelationDef::to_id("users"))]
                .into_iter()
                .collect(),
            TableOptions::default()
                .with_encryption(EncryptionOptions::new("k", ["secret"])),
        );

        match result {
            Err(Error::InvalidSchema(msg)) => {
                assert!(msg.contains("age: min"));
                assert!(msg.contains("owner"));
                assert!(msg.contains("secret"));
            }
            other => panic!("expected InvalidSchema, got {:?}", other),
        }
    }

    #[test]
    fn test_persisted_field_names() {
        let unit = TableUnit::new(
            "t",
            IndexMap::new(),
            IndexMap::new(),
            TableOptions::default(),
        )
        .unwrap();
        let v = serde_json::to_value(&unit).unwrap();
        let obj = v.as_object().unwrap();

        for key in ["name", "createdAt", "columns", "relationships", "rows", "indexes", "options"] {
            assert!(obj.contains_key(key), "missing {}", key);
        }
        assert_eq!(v["options"], json!({"encryption": {}, "timestamps": false}));
    }
}
