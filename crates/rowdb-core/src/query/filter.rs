//! Filter evaluation for query execution.
//!
//! A filter maps fields to conditions. A plain value means equality; an
//! object of `$`-operators applies every operator to the field. All
//! conditions are conjunctive.

use std::collections::HashSet;

use regex::Regex;
use serde_json::Value;

use super::compare::{compare_values, value_text, values_equal};
use crate::catalog::Row;
use crate::error::Error;

/// A single comparison applied to one field.
#[derive(Debug, Clone)]
pub enum Operator {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    /// Case-sensitive substring match on string values.
    Like(String),
    /// Regular expression match on scalar values.
    Regex(Regex),
}

/// The condition a field must satisfy.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Field equals the value.
    Equals(Value),
    /// Field satisfies every operator.
    Ops(Vec<Operator>),
}

/// Conjunction of per-field conditions.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<(String, Condition)>,
}

impl Operator {
    /// Parse an operator name and operand.
    pub fn parse(name: &str, operand: &Value) -> Result<Self, Error> {
        let op = match name {
            "$eq" => Operator::Eq(operand.clone()),
            "$ne" => Operator::Ne(operand.clone()),
            "$gt" => Operator::Gt(operand.clone()),
            "$gte" => Operator::Gte(operand.clone()),
            "$lt" => Operator::Lt(operand.clone()),
            "$lte" => Operator::Lte(operand.clone()),
            "$in" => Operator::In(Self::list_operand(name, operand)?),
            "$nin" => Operator::Nin(Self::list_operand(name, operand)?),
            "$like" => match operand {
                Value::String(s) => Operator::Like(s.clone()),
                other => {
                    return Err(Error::InvalidQuery(format!(
                        "$like needs a string, got {}",
                        other
                    )))
                }
            },
            "$regex" => {
                let pattern = operand.as_str().ok_or_else(|| {
                    Error::InvalidQuery(format!("$regex needs a string, got {}", operand))
                })?;
                let re = Regex::new(pattern)
                    .map_err(|e| Error::InvalidQuery(format!("invalid $regex: {}", e)))?;
                Operator::Regex(re)
            }
            other => return Err(Error::InvalidQuery(format!("unknown operator {}", other))),
        };
        Ok(op)
    }

    fn list_operand(name: &str, operand: &Value) -> Result<Vec<Value>, Error> {
        match operand {
            Value::Array(items) => Ok(items.clone()),
            other => Err(Error::InvalidQuery(format!(
                "{} needs an array, got {}",
                name, other
            ))),
        }
    }

    /// Check a field value (`None` when the field is absent).
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Operator::Eq(v) => equals(value, v),
            Operator::Ne(v) => !equals(value, v),
            Operator::Gt(v) => ordered(value, v, |o| o.is_gt()),
            Operator::Gte(v) => ordered(value, v, |o| o.is_ge()),
            Operator::Lt(v) => ordered(value, v, |o| o.is_lt()),
            Operator::Lte(v) => ordered(value, v, |o| o.is_le()),
            Operator::In(values) => match value {
                Some(fv) => values.iter().any(|v| values_equal(fv, v)),
                None => false,
            },
            // absent is never in the set
            Operator::Nin(values) => match value {
                Some(fv) => !values.iter().any(|v| values_equal(fv, v)),
                None => true,
            },
            Operator::Like(needle) => match value {
                Some(Value::String(s)) => s.contains(needle.as_str()),
                _ => false,
            },
            Operator::Regex(re) => match value {
                Some(v @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => {
                    re.is_match(&value_text(v))
                }
                _ => false,
            },
        }
    }
}

/// Equality where an expected null also matches an absent field.
fn equals(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        Some(v) => values_equal(v, expected),
        None => expected.is_null(),
    }
}

fn ordered(value: Option<&Value>, operand: &Value, test: fn(std::cmp::Ordering) -> bool) -> bool {
    value
        .and_then(|v| compare_values(v, operand))
        .is_some_and(test)
}

impl Condition {
    /// Parse a condition from its JSON form.
    pub fn from_json(value: &Value) -> Result<Self, Error> {
        let Value::Object(obj) = value else {
            return Ok(Condition::Equals(value.clone()));
        };
        let operator_keys = obj.keys().filter(|k| k.starts_with('$')).count();
        if operator_keys == 0 {
            return Ok(Condition::Equals(value.clone()));
        }
        if operator_keys != obj.len() {
            return Err(Error::InvalidQuery(
                "condition mixes operators and plain keys".to_string(),
            ));
        }
        let ops = obj
            .iter()
            .map(|(name, operand)| Operator::parse(name, operand))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Condition::Ops(ops))
    }

    /// Check a field value.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Condition::Equals(expected) => equals(value, expected),
            Condition::Ops(ops) => ops.iter().all(|op| op.matches(value)),
        }
    }
}

impl Filter {
    /// Create an empty filter (matches every row).
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a filter from a JSON object. `null` is the empty filter.
    pub fn from_json(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(obj) => {
                let conditions = obj
                    .iter()
                    .map(|(field, cond)| Ok((field.clone(), Condition::from_json(cond)?)))
                    .collect::<Result<Vec<_>, Error>>()?;
                Ok(Self { conditions })
            }
            other => Err(Error::InvalidQuery(format!(
                "where clause must be an object, got {}",
                other
            ))),
        }
    }

    /// Require `field` to equal `value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions
            .push((field.into(), Condition::Equals(value.into())));
        self
    }

    /// Require `field` to satisfy `op`.
    pub fn op(mut self, field: impl Into<String>, op: Operator) -> Self {
        self.conditions.push((field.into(), Condition::Ops(vec![op])));
        self
    }

    /// Check if the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Fields referenced by the filter.
    pub fn fields(&self) -> HashSet<&str> {
        self.conditions.iter().map(|(f, _)| f.as_str()).collect()
    }

    /// Check a row against every condition.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .all(|(field, cond)| cond.matches(row.get(field)))
    }
}

/// Evaluates filters against row sets.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Keep the rows matching `filter`, preserving order.
    pub fn apply(filter: &Filter, rows: Vec<Row>) -> Vec<Row> {
        if filter.is_empty() {
            return rows;
        }
        rows.into_iter().filter(|r| filter.matches(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn check(filter: Value, r: Value) -> bool {
        Filter::from_json(&filter).unwrap().matches(&row(r))
    }

    #[test]
    fn test_plain_value_is_equality() {
        assert!(check(json!({"name": "a"}), json!({"name": "a"})));
        assert!(!check(json!({"name": "a"}), json!({"name": "b"})));
        assert!(!check(json!({"name": "a"}), json!({})));
        assert!(check(json!({"n": 5}), json!({"n": 5.0})));
    }

    #[test]
    fn test_comparison_operators() {
        let r = json!({"age": 30, "name": "carol"});
        assert!(check(json!({"age": {"$gt": 18}}), r.clone()));
        assert!(check(json!({"age": {"$gte": 30, "$lte": 30}}), r.clone()));
        assert!(!check(json!({"age": {"$gt": 18, "$lt": 25}}), r.clone()));
        assert!(check(json!({"age": {"$ne": 31}}), r.clone()));
        assert!(check(json!({"age": {"$eq": 30}}), r.clone()));
        assert!(!check(json!({"age": {"$gt": "10"}}), r.clone()));
        assert!(!check(json!({"missing": {"$lt": 100}}), r));
    }

    #[test]
    fn test_set_operators() {
        let r = json!({"tag": "b"});
        assert!(check(json!({"tag": {"$in": ["a", "b"]}}), r.clone()));
        assert!(!check(json!({"tag": {"$nin": ["a", "b"]}}), r.clone()));
        assert!(check(json!({"other": {"$nin": ["a"]}}), r.clone()));
        assert!(!check(json!({"other": {"$in": ["a"]}}), r));
    }

    #[test]
    fn test_text_operators() {
        let r = json!({"email": "Alice@example.com", "code": 1234});
        assert!(check(json!({"email": {"$like": "example"}}), r.clone()));
        assert!(!check(json!({"email": {"$like": "alice"}}), r.clone()));
        assert!(check(json!({"email": {"$regex": "(?i)^alice@"}}), r.clone()));
        assert!(check(json!({"code": {"$regex": "^12"}}), r.clone()));
        assert!(!check(json!({"code": {"$like": "12"}}), r));
    }

    #[test]
    fn test_fields_are_conjunctive() {
        let f = json!({"a": 1, "b": {"$gt": 1}});
        assert!(check(f.clone(), json!({"a": 1, "b": 2})));
        assert!(!check(f, json!({"a": 1, "b": 0})));
    }

    #[test]
    fn test_null_equality_matches_absent() {
        assert!(check(json!({"x": null}), json!({})));
        assert!(check(json!({"x": null}), json!({"x": null})));
        assert!(!check(json!({"x": {"$ne": null}}), json!({})));
    }

    #[test]
    fn test_object_without_operators_is_equality() {
        assert!(check(json!({"meta": {"k": 1}}), json!({"meta": {"k": 1}})));
    }

    #[test]
    fn test_malformed_filters_rejected() {
        for bad in [
            json!({"a": {"$between": [1, 2]}}),
            json!({"a": {"$in": 3}}),
            json!({"a": {"$regex": "("}}),
            json!({"a": {"$gt": 1, "plain": 2}}),
            json!(["a"]),
        ] {
            assert!(
                matches!(Filter::from_json(&bad), Err(Error::InvalidQuery(_))),
                "accepted {}",
                bad
            );
        }
    }

    #[test]
    fn test_builder_and_fields() {
        let f = Filter::new()
            .eq("status", "open")
            .op("age", Operator::Gte(json!(21)));
        assert_eq!(f.fields(), HashSet::from(["status", "age"]));

        let rows = vec![
            row(json!({"status": "open", "age": 30})),
            row(json!({"status": "open", "age": 12})),
            row(json!({"status": "closed", "age": 40})),
        ];
        let kept = FilterEvaluator::apply(&f, rows);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0]["age"], json!(30));
    }
}
