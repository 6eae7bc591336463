//! Row validation against a table's column schema.
//!
//! The `SchemaValidator` is pure: it sees the column definitions and the
//! rows already in the table and either returns the row with defaults
//! applied or every violation it found.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Number, Value};

use crate::catalog::{ColumnDef, ColumnType, Row, ID_FIELD};
use crate::error::Error;
use crate::query::compare::{coerce_number, values_equal};

/// Largest magnitude an `f64` holds as an exact integer.
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// Validator for rows of one table.
///
/// Column patterns are compiled once, when the validator is built.
pub struct SchemaValidator<'a> {
    table: &'a str,
    columns: &'a IndexMap<String, ColumnDef>,
    patterns: HashMap<&'a str, Result<Regex, String>>,
}

impl<'a> SchemaValidator<'a> {
    /// Create a validator over a table's columns.
    pub fn new(table: &'a str, columns: &'a IndexMap<String, ColumnDef>) -> Self {
        let patterns = columns
            .iter()
            .filter_map(|(name, col)| {
                let pattern = col.pattern.as_deref()?;
                Some((name.as_str(), compile(pattern)))
            })
            .collect();
        Self {
            table,
            columns,
            patterns,
        }
    }

    /// Validate a row that replaces the stored row with the same `id`.
    ///
    /// `existing` must be plaintext. The row whose `id` matches is skipped
    /// when scanning for unique conflicts.
    pub fn validate(&self, row: &Row, existing: &[Row]) -> Result<Row, Error> {
        self.check_row(row, existing, true)
    }

    /// Validate a row that is added next to `existing`.
    ///
    /// No existing row counts as the same row, and an `id` already present
    /// is a violation.
    pub fn validate_new(&self, row: &Row, existing: &[Row]) -> Result<Row, Error> {
        self.check_row(row, existing, false)
    }

    fn check_row(&self, row: &Row, existing: &[Row], replacing: bool) -> Result<Row, Error> {
        let mut out = row.clone();
        let mut violations = Vec::new();

        for field in row.keys() {
            if field != ID_FIELD && !self.columns.contains_key(field) {
                violations.push(format!("{}: is not a declared column", field));
            }
        }

        for (name, col) in self.columns {
            match out.get_mut(name) {
                None => {
                    if let Some(default) = &col.default {
                        out.insert(name.clone(), default.resolve());
                    }
                }
                Some(value) => {
                    if let Some(number) = normalize_number(col.column_type, value) {
                        *value = number;
                    }
                }
            }
        }

        let row_id = out.get(ID_FIELD).filter(|v| !v.is_null()).cloned();
        let id_is_unique = self.columns.get(ID_FIELD).is_some_and(|c| c.unique);
        if let Some(id) = row_id.as_ref().filter(|_| !replacing && !id_is_unique) {
            if existing
                .iter()
                .any(|other| other.get(ID_FIELD).is_some_and(|v| values_equal(v, id)))
            {
                violations.push(format!("{}: value {} already exists", ID_FIELD, id));
            }
        }
        let same_row = if replacing { row_id.as_ref() } else { None };

        for (name, col) in self.columns {
            let value = match out.get(name) {
                Some(v) if !v.is_null() => v,
                _ => {
                    if col.required {
                        violations.push(format!("{}: is required", name));
                    }
                    continue;
                }
            };

            self.check_value(name, col, value, &mut violations);

            if col.unique && Self::conflicts(name, value, same_row, existing) {
                violations.push(format!("{}: value {} already exists", name, value));
            }
        }

        if violations.is_empty() {
            Ok(out)
        } else {
            Err(Error::validation(self.table, violations))
        }
    }

    /// Run type and range checks for one present value.
    ///
    /// Every failing check adds its own violation.
    pub fn check_value(&self, name: &str, col: &ColumnDef, value: &Value, violations: &mut Vec<String>) {
        if !type_accepts(col.column_type, value) {
            violations.push(format!(
                "{}: expected {}, got {}",
                name, col.column_type, value
            ));
        }

        if col.min.is_some() || col.max.is_some() {
            match coerce_number(value) {
                Some(n) => {
                    if let Some(min) = col.min {
                        if n < min {
                            violations.push(format!("{}: must be >= {}", name, min));
                        }
                    }
                    if let Some(max) = col.max {
                        if n > max {
                            violations.push(format!("{}: must be <= {}", name, max));
                        }
                    }
                }
                None => violations.push(format!("{}: bounds need a numeric value", name)),
            }
        }

        if let Value::String(s) = value {
            let len = s.chars().count();
            if let Some(min) = col.min_length {
                if len < min {
                    violations.push(format!("{}: length must be >= {}", name, min));
                }
            }
            if let Some(max) = col.max_length {
                if len > max {
                    violations.push(format!("{}: length must be <= {}", name, max));
                }
            }
            if let Some(pattern) = &col.pattern {
                let fresh;
                let compiled = match self.patterns.get(name) {
                    Some(compiled) => compiled,
                    None => {
                        fresh = compile(pattern);
                        &fresh
                    }
                };
                match compiled {
                    Ok(re) if re.is_match(s) => {}
                    Ok(_) => violations.push(format!("{}: does not match pattern {}", name, pattern)),
                    Err(e) => violations.push(format!("{}: invalid pattern: {}", name, e)),
                }
            }
        } else if col.min_length.is_some() || col.max_length.is_some() || col.pattern.is_some() {
            violations.push(format!("{}: length and pattern checks need a string", name));
        }
    }

    fn conflicts(name: &str, value: &Value, same_row: Option<&Value>, existing: &[Row]) -> bool {
        existing.iter().any(|other| {
            let is_same = match (same_row, other.get(ID_FIELD)) {
                (Some(a), Some(b)) => values_equal(a, b),
                _ => false,
            };
            !is_same && other.get(name).is_some_and(|v| values_equal(v, value))
        })
    }
}

fn compile(pattern: &str) -> Result<Regex, String> {
    Regex::new(pattern).map_err(|e| e.to_string())
}

/// Numeric text in a numeric column, rewritten as a JSON number.
///
/// Returns `None` when the value should be stored as given.
fn normalize_number(column_type: ColumnType, value: &Value) -> Option<Value> {
    if !value.is_string() {
        return None;
    }
    let n = coerce_number(value)?;
    match column_type {
        ColumnType::Int if n.fract() == 0.0 && n.abs() <= MAX_EXACT_INT => Some(Value::from(n as i64)),
        ColumnType::Float => Number::from_f64(n).map(Value::Number),
        _ => None,
    }
}

/// Type conformance predicate for a present, non-null value.
pub fn type_accepts(column_type: ColumnType, value: &Value) -> bool {
    match column_type {
        ColumnType::Text => value.is_string(),
        ColumnType::Int => coerce_number(value).is_some_and(|n| n.fract() == 0.0),
        ColumnType::Float => coerce_number(value).is_some(),
        ColumnType::Boolean => value.is_boolean(),
        ColumnType::Uuid => value.as_str().is_some_and(is_canonical_uuid),
        ColumnType::Timestamp => match value {
            Value::String(s) => parses_as_timestamp(s),
            Value::Number(n) => n.is_i64() || n.is_u64(),
            _ => false,
        },
        ColumnType::Json => match value {
            Value::Object(_) | Value::Array(_) => true,
            Value::String(s) => serde_json::from_str::<Value>(s).is_ok(),
            _ => false,
        },
    }
}

/// Hyphenated 8-4-4-4-12 form only; the other textual forms differ in length.
fn is_canonical_uuid(s: &str) -> bool {
    s.len() == 36 && uuid::Uuid::parse_str(s).is_ok()
}

fn parses_as_timestamp(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}
