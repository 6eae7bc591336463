//! Select pipeline: filter → join → sort → paginate → project.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use super::compare::compare_values;
use super::filter::{Filter, FilterEvaluator};
use super::join::{apply_joins, JoinSource, JoinSpec};
use crate::catalog::Row;
use crate::error::Error;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending; absent values first.
    #[default]
    #[serde(alias = "ascending")]
    Asc,
    /// Descending; absent values last.
    #[serde(alias = "descending")]
    Desc,
}

/// Single-field sort order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Field to sort on.
    pub field: String,
    /// Direction.
    #[serde(default, alias = "order")]
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// A select query.
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    /// Row filter.
    pub filter: Filter,
    /// Joins, applied in order.
    pub joins: Vec<JoinSpec>,
    /// Sort order.
    pub order_by: Option<OrderBy>,
    /// Maximum rows returned after the offset.
    pub limit: Option<usize>,
    /// Rows skipped after sorting.
    pub offset: usize,
    /// Projection.
    pub fields: Option<Vec<String>>,
}

impl SelectQuery {
    /// Select every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Add a join.
    pub fn join(mut self, join: JoinSpec) -> Self {
        self.joins.push(join);
        self
    }

    /// Set the sort order.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by = Some(order);
        self
    }

    /// Set the limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Set the projected fields.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Parse a query document with the keys `where`, `join`, `orderBy`,
    /// `limit`, `offset` and `fields`. Every key is optional.
    pub fn from_json(doc: &Value) -> Result<Self, Error> {
        let obj = match doc {
            Value::Null => return Ok(Self::new()),
            Value::Object(obj) => obj,
            other => {
                return Err(Error::InvalidQuery(format!(
                    "query must be an object, got {}",
                    other
                )))
            }
        };

        if let Some(key) = obj.keys().find(|k| {
            !matches!(
                k.as_str(),
                "where" | "join" | "orderBy" | "limit" | "offset" | "fields"
            )
        }) {
            return Err(Error::InvalidQuery(format!("unknown query key '{}'", key)));
        }

        let mut query = Self::new();
        if let Some(w) = obj.get("where") {
            query.filter = Filter::from_json(w)?;
        }
        if let Some(j) = obj.get("join") {
            query.joins = serde_json::from_value(j.clone())
                .map_err(|e| Error::InvalidQuery(format!("join: {}", e)))?;
        }
        if let Some(o) = obj.get("orderBy") {
            query.order_by = match o {
                Value::Null => None,
                Value::String(field) => Some(OrderBy::asc(field.clone())),
                other => Some(
                    serde_json::from_value(other.clone())
                        .map_err(|e| Error::InvalidQuery(format!("orderBy: {}", e)))?,
                ),
            };
        }
        query.limit = count_key(obj.get("limit"), "limit")?;
        query.offset = count_key(obj.get("offset"), "offset")?.unwrap_or(0);
        if let Some(f) = obj.get("fields") {
            query.fields = serde_json::from_value(f.clone())
                .map_err(|e| Error::InvalidQuery(format!("fields: {}", e)))?;
        }
        Ok(query)
    }
}

fn count_key(value: Option<&Value>, name: &str) -> Result<Option<usize>, Error> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| Error::InvalidQuery(format!("{} must be a non-negative integer", name))),
    }
}

/// Runs select queries over an in-memory, decrypted row set.
pub struct QueryExecutor;

impl QueryExecutor {
    /// Execute the pipeline in its fixed order.
    pub fn execute(
        query: &SelectQuery,
        rows: Vec<Row>,
        source: &dyn JoinSource,
    ) -> Result<Vec<Row>, Error> {
        let scanned = rows.len();

        let rows = FilterEvaluator::apply(&query.filter, rows);
        let mut rows = apply_joins(rows, &query.joins, source)?;

        if let Some(order) = &query.order_by {
            sort_rows(&mut rows, order);
        }

        let rows: Vec<Row> = rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        let rows = match &query.fields {
            Some(fields) => rows.iter().map(|r| project(r, fields)).collect(),
            None => rows,
        };

        trace!(scanned, returned = rows.len(), "select executed");
        Ok(rows)
    }
}

/// Stable single-field sort. Absent and null values sort first ascending and
/// last descending; values that cannot be ordered against each other keep
/// their relative order.
pub fn sort_rows(rows: &mut [Row], order: &OrderBy) {
    let field = order.field.as_str();
    rows.sort_by(|a, b| {
        let ord = ascending(a.get(field), b.get(field));
        match order.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

fn ascending(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

/// Keep only the listed fields that are present, in the listed order.
pub fn project(row: &Row, fields: &[String]) -> Row {
    fields
        .iter()
        .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use serde_json::json;

    fn rows(values: Vec<Value>) -> Vec<Row> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn run(query: &SelectQuery, input: Vec<Row>) -> Vec<Row> {
        QueryExecutor::execute(query, input, &HashMap::<String, Vec<Row>>::new()).unwrap()
    }

    #[test]
    fn test_sort_nulls_first_then_last() {
        let input = rows(vec![
            json!({"n": 2}),
            json!({}),
            json!({"n": 1}),
            json!({"n": null}),
        ]);

        let asc = run(&SelectQuery::new().order_by(OrderBy::asc("n")), input.clone());
        let got: Vec<_> = asc.iter().map(|r| r.get("n").cloned()).collect();
        assert_eq!(got, vec![None, Some(Value::Null), Some(json!(1)), Some(json!(2))]);

        let desc = run(&SelectQuery::new().order_by(OrderBy::desc("n")), input);
        assert_eq!(desc[0]["n"], json!(2));
        assert_eq!(desc[1]["n"], json!(1));
        assert!(desc[2].get("n").map_or(true, Value::is_null));
        assert!(desc[3].get("n").map_or(true, Value::is_null));
    }

    #[test]
    fn test_pagination_window() {
        let input = rows((0..10).map(|i| json!({"i": i})).collect());
        let out = run(&SelectQuery::new().offset(3).limit(4), input);
        let got: Vec<_> = out.iter().map(|r| r["i"].clone()).collect();
        assert_eq!(got, vec![json!(3), json!(4), json!(5), json!(6)]);
    }

    #[test]
    fn test_offset_past_end() {
        let input = rows(vec![json!({"i": 0})]);
        assert!(run(&SelectQuery::new().offset(5), input).is_empty());
    }

    #[test]
    fn test_projection_omits_absent_fields() {
        let input = rows(vec![json!({"a": 1, "b": 2, "c": 3}), json!({"a": 4})]);
        let query = SelectQuery::new().fields(["b", "a"]);
        let out = run(&query, input.clone());

        assert_eq!(out[0], rows(vec![json!({"b": 2, "a": 1})])[0]);
        assert_eq!(out[1].len(), 1);
        assert_eq!(run(&query, input), out);
    }

    #[test]
    fn test_sort_applies_before_pagination() {
        let input = rows((0..5).map(|i| json!({"i": i})).collect());
        let query = SelectQuery::new()
            .order_by(OrderBy::desc("i"))
            .limit(2);
        let out = run(&query, input);
        assert_eq!(out[0]["i"], json!(4));
        assert_eq!(out[1]["i"], json!(3));
    }

    #[test]
    fn test_from_json() {
        let query = SelectQuery::from_json(&json!({
            "where": {"age": {"$gte": 18}},
            "join": [{"table": "users", "on": {"local": "user_id", "foreign": "id"}, "as": "author", "type": "left"}],
            "orderBy": {"field": "age", "direction": "desc"},
            "limit": 5,
            "offset": 1,
            "fields": ["age", "author"]
        }))
        .unwrap();

        assert_eq!(query.filter.fields().len(), 1);
        assert_eq!(query.joins.len(), 1);
        assert_eq!(query.order_by, Some(OrderBy::desc("age")));
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.offset, 1);
        assert_eq!(query.fields, Some(vec!["age".to_string(), "author".to_string()]));

        let by_name = SelectQuery::from_json(&json!({"orderBy": "name"})).unwrap();
        assert_eq!(by_name.order_by, Some(OrderBy::asc("name")));
    }

    #[test]
    fn test_from_json_rejects_bad_documents() {
        for bad in [
            json!({"limit": -1}),
            json!({"offset": "3"}),
            json!({"sort": "a"}),
            json!({"join": [{"table": "x"}]}),
            json!(42),
        ] {
            assert!(
                matches!(SelectQuery::from_json(&bad), Err(Error::InvalidQuery(_))),
                "accepted {}",
                bad
            );
        }
    }
}
