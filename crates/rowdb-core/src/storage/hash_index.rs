//! Advisory index bookkeeping.
//!
//! A hash index maps the text form of a field value to the positions of the
//! rows holding it. The map is built once, when the index is declared, over
//! the rows present at that moment. Later writes do not refresh it and the
//! query pipeline does not read it.

use std::collections::BTreeMap;

use tracing::debug;

use crate::catalog::{IndexDef, IndexKind, IndexOptions, Row, TableUnit, ID_FIELD};
use crate::error::Error;
use crate::query::compare::value_text;

/// Builds and records index definitions on a table unit.
pub struct IndexManager;

impl IndexManager {
    /// Declare an index on `field`, replacing any previous index on it.
    ///
    /// `rows` must be the plaintext rows of `unit`, in stored order.
    pub fn add_index(
        unit: &mut TableUnit,
        rows: &[Row],
        field: &str,
        options: IndexOptions,
    ) -> Result<IndexDef, Error> {
        if field != ID_FIELD {
            unit.column(field)?;
        }

        let mut def = IndexDef::new(field, options);
        if def.kind == IndexKind::Hash {
            let data = Self::build_hash(field, rows);
            if def.unique {
                Self::check_unique(&unit.name, field, &data)?;
            }
            def.data = Some(data);
        }

        debug!(
            table = %unit.name,
            field,
            kind = ?def.kind,
            keys = def.data.as_ref().map(|d| d.len()).unwrap_or(0),
            "built index"
        );
        unit.indexes.insert(field.to_string(), def.clone());
        Ok(def)
    }

    /// Build the value → row-position map. Rows without the field, or with
    /// null, are not indexed.
    pub fn build_hash(field: &str, rows: &[Row]) -> BTreeMap<String, Vec<usize>> {
        let mut data: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (pos, row) in rows.iter().enumerate() {
            match row.get(field) {
                None | Some(serde_json::Value::Null) => continue,
                Some(value) => data.entry(value_text(value)).or_default().push(pos),
            }
        }
        data
    }

    fn check_unique(
        table: &str,
        field: &str,
        data: &BTreeMap<String, Vec<usize>>,
    ) -> Result<(), Error> {
        let violations: Vec<String> = data
            .iter()
            .filter(|(_, positions)| positions.len() > 1)
            .map(|(key, positions)| {
                format!(
                    "{}: unique index over duplicate value {} at rows {:?}",
                    field, key, positions
                )
            })
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(table, violations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, TableOptions};
    use indexmap::IndexMap;
    use serde_json::json;

    fn table(rows: Vec<serde_json::Value>) -> TableUnit {
        let columns = [
            ("city".to_string(), ColumnDef::text()),
            ("age".to_string(), ColumnDef::int()),
        ]
        .into_iter()
        .collect();
        let mut unit =
            TableUnit::new("people", columns, IndexMap::new(), TableOptions::default()).unwrap();
        unit.rows = rows
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        unit
    }

    #[test]
    fn test_hash_index_positions() {
        let mut unit = table(vec![
            json!({"id": "a", "city": "Oslo", "age": 30}),
            json!({"id": "b", "city": "Rome"}),
            json!({"id": "c", "city": "Oslo", "age": null}),
            json!({"id": "d", "age": 30}),
        ]);
        let rows = unit.rows.clone();

        let def = IndexManager::add_index(&mut unit, &rows, "city", IndexOptions::hash()).unwrap();
        assert_eq!(def.positions("Oslo"), Some(&[0, 2][..]));
        assert_eq!(def.positions("Rome"), Some(&[1][..]));
        assert_eq!(def.positions("Paris"), None);

        let def = IndexManager::add_index(&mut unit, &rows, "age", IndexOptions::hash()).unwrap();
        assert_eq!(def.positions("30"), Some(&[0, 3][..]));
        assert_eq!(unit.indexes.len(), 2);
    }

    #[test]
    fn test_value_index_has_no_data() {
        let mut unit = table(vec![json!({"id": "a", "city": "Oslo"})]);
        let rows = unit.rows.clone();
        let def =
            IndexManager::add_index(&mut unit, &rows, "city", IndexOptions::default()).unwrap();
        assert_eq!(def.kind, IndexKind::Value);
        assert!(def.data.is_none());
    }

    #[test]
    fn test_unique_index_rejects_duplicates() {
        let mut unit = table(vec![
            json!({"id": "a", "city": "Oslo"}),
            json!({"id": "b", "city": "Oslo"}),
        ]);
        let rows = unit.rows.clone();
        let err = IndexManager::add_index(&mut unit, &rows, "city", IndexOptions::hash().unique())
            .unwrap_err();
        assert!(err.violations()[0].starts_with("city:"));
        assert!(unit.indexes.is_empty());
    }

    #[test]
    fn test_unknown_field() {
        let mut unit = table(vec![]);
        assert!(matches!(
            IndexManager::add_index(&mut unit, &[], "nope", IndexOptions::hash()),
            Err(Error::ColumnNotFound { .. })
        ));
        assert!(IndexManager::add_index(&mut unit, &[], "id", IndexOptions::hash()).is_ok());
    }
}
