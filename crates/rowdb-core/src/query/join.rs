//! Key-equality joins against other tables.
//!
//! Each join attaches the matching foreign rows to a row under an alias:
//! `null` for none (left joins only), the record itself for exactly one, and
//! a list for several.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::Row;
use crate::error::Error;

/// How rows without a match are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    /// Drop rows without a match.
    #[default]
    Inner,
    /// Keep rows without a match, with `null` under the alias.
    Left,
}

/// The key-equality condition of a join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOn {
    /// Field on the row being joined.
    pub local: String,
    /// Field on the target table.
    pub foreign: String,
}

/// One join in a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Target table.
    pub table: String,
    /// Key equality.
    pub on: JoinOn,
    /// Output field; defaults to the target table's name.
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Join type.
    #[serde(rename = "type", default)]
    pub join_type: JoinType,
}

impl JoinSpec {
    /// Inner join `table` on `local == foreign`.
    pub fn inner(
        table: impl Into<String>,
        local: impl Into<String>,
        foreign: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            on: JoinOn {
                local: local.into(),
                foreign: foreign.into(),
            },
            alias: None,
            join_type: JoinType::Inner,
        }
    }

    /// Left join `table` on `local == foreign`.
    pub fn left(
        table: impl Into<String>,
        local: impl Into<String>,
        foreign: impl Into<String>,
    ) -> Self {
        Self {
            join_type: JoinType::Left,
            ..Self::inner(table, local, foreign)
        }
    }

    /// Set the output field.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Output field name.
    pub fn output_field(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

/// Supplies the decrypted rows of join targets.
pub trait JoinSource {
    /// Rows of `table`, or `None` if the table does not exist.
    fn rows(&self, table: &str) -> Result<Option<Vec<Row>>, Error>;
}

impl JoinSource for HashMap<String, Vec<Row>> {
    fn rows(&self, table: &str) -> Result<Option<Vec<Row>>, Error> {
        Ok(self.get(table).cloned())
    }
}

/// Canonical hash key consistent with `values_equal` for scalars.
fn join_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Number(n) => Some(format!("n:{}", n.as_f64()?)),
        Value::String(s) => Some(format!("s:{}", s)),
        Value::Bool(b) => Some(format!("b:{}", b)),
        other => Some(format!("j:{}", other)),
    }
}

/// Apply joins in order.
pub fn apply_joins(
    mut rows: Vec<Row>,
    joins: &[JoinSpec],
    source: &dyn JoinSource,
) -> Result<Vec<Row>, Error> {
    for join in joins {
        rows = apply_join(rows, join, source)?;
    }
    Ok(rows)
}

fn apply_join(rows: Vec<Row>, join: &JoinSpec, source: &dyn JoinSource) -> Result<Vec<Row>, Error> {
    let Some(targets) = source.rows(&join.table)? else {
        return Ok(match join.join_type {
            JoinType::Inner => Vec::new(),
            JoinType::Left => rows,
        });
    };

    // Build phase: foreign key -> matching target rows, in stored order.
    let mut by_key: HashMap<String, Vec<Row>> = HashMap::new();
    for target in targets {
        if let Some(key) = target.get(&join.on.foreign).and_then(join_key) {
            by_key.entry(key).or_default().push(target);
        }
    }

    // Probe phase.
    let alias = join.output_field().to_string();
    let mut out = Vec::with_capacity(rows.len());
    for mut row in rows {
        let matches = row
            .get(&join.on.local)
            .and_then(join_key)
            .and_then(|k| by_key.get(&k));

        let attached = match matches.map(|m| m.as_slice()) {
            None | Some([]) => match join.join_type {
                JoinType::Inner => continue,
                JoinType::Left => Value::Null,
            },
            Some([single]) => Value::Object(single.clone()),
            Some(many) => Value::Array(many.iter().cloned().map(Value::Object).collect()),
        };
        row.insert(alias.clone(), attached);
        out.push(row);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn source() -> HashMap<String, Vec<Row>> {
        let mut tables = HashMap::new();
        tables.insert(
            "users".to_string(),
            vec![
                row(json!({"id": "u1", "name": "ann"})),
                row(json!({"id": "u2", "name": "bob"})),
            ],
        );
        tables.insert(
            "tags".to_string(),
            vec![
                row(json!({"post": 1, "tag": "a"})),
                row(json!({"post": 1, "tag": "b"})),
            ],
        );
        tables
    }

    fn posts() -> Vec<Row> {
        vec![
            row(json!({"id": 1, "user_id": "u1"})),
            row(json!({"id": 2, "user_id": "ghost"})),
        ]
    }

    #[test]
    fn test_left_join_null_for_missing() {
        let join = JoinSpec::left("users", "user_id", "id").alias("author");
        let out = apply_joins(posts(), &[join], &source()).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["author"]["name"], json!("ann"));
        assert_eq!(out[1]["author"], Value::Null);
    }

    #[test]
    fn test_inner_join_drops_missing() {
        let join = JoinSpec::inner("users", "user_id", "id").alias("author");
        let out = apply_joins(posts(), &[join], &source()).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["id"], json!(1));
    }

    #[test]
    fn test_many_matches_become_list() {
        let join = JoinSpec::left("tags", "id", "post");
        let out = apply_joins(posts(), &[join], &source()).unwrap();

        assert_eq!(out[0]["tags"].as_array().unwrap().len(), 2);
        assert_eq!(out[1]["tags"], Value::Null);
    }

    #[test]
    fn test_missing_target_table() {
        let inner = JoinSpec::inner("nope", "user_id", "id");
        assert!(apply_joins(posts(), &[inner], &source()).unwrap().is_empty());

        let left = JoinSpec::left("nope", "user_id", "id").alias("x");
        let out = apply_joins(posts(), &[left], &source()).unwrap();
        assert_eq!(out, posts());
    }

    #[test]
    fn test_numeric_keys_match_across_representations() {
        let mut tables = HashMap::new();
        tables.insert("t".to_string(), vec![row(json!({"k": 1.0, "v": "x"}))]);
        let out = apply_joins(
            vec![row(json!({"ref": 1}))],
            &[JoinSpec::inner("t", "ref", "k")],
            &tables,
        )
        .unwrap();
        assert_eq!(out[0]["t"]["v"], json!("x"));
    }

    #[test]
    fn test_spec_parsing() {
        let spec: JoinSpec = serde_json::from_value(json!({
            "table": "users",
            "on": {"local": "user_id", "foreign": "id"},
            "as": "author",
            "type": "left"
        }))
        .unwrap();
        assert_eq!(spec, JoinSpec::left("users", "user_id", "id").alias("author"));
    }
}
