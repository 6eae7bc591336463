//! Column definitions for tables.

use super::types::ColumnType;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A column definition within a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    /// Column data type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Value must be present and non-null.
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    /// No two rows may hold equal values.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    /// Inclusive numeric lower bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive numeric upper bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Minimum string length in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Maximum string length in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Regular expression string values must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Value used when the field is absent on insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
}

/// Default value for a column.
///
/// A generator is written as `{"generate": "<name>"}`; any other JSON value
/// is a static default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    /// Evaluated each time a default is needed.
    Generated {
        /// Which generator to run.
        generate: Generator,
    },
    /// Fixed value.
    Static(Value),
}

/// Zero-argument default generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Generator {
    /// Random v4 UUID.
    Uuid,
    /// Current time as an ISO-8601 string.
    Now,
    /// Current time as epoch milliseconds.
    NowMillis,
}

impl DefaultValue {
    /// Produce the value to store.
    pub fn resolve(&self) -> Value {
        match self {
            DefaultValue::Static(v) => v.clone(),
            DefaultValue::Generated { generate } => generate.generate(),
        }
    }
}

impl Generator {
    /// Run the generator.
    pub fn generate(&self) -> Value {
        match self {
            Generator::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
            Generator::Now => Value::String(now_iso()),
            Generator::NowMillis => Value::from(Utc::now().timestamp_millis()),
        }
    }
}

/// Current UTC time in ISO-8601 form with millisecond precision.
pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ColumnDef {
    /// Create an optional, unconstrained column.
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            required: false,
            unique: false,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            pattern: None,
            default: None,
        }
    }

    pub fn text() -> Self {
        Self::new(ColumnType::Text)
    }

    pub fn int() -> Self {
        Self::new(ColumnType::Int)
    }

    pub fn float() -> Self {
        Self::new(ColumnType::Float)
    }

    pub fn boolean() -> Self {
        Self::new(ColumnType::Boolean)
    }

    pub fn uuid() -> Self {
        Self::new(ColumnType::Uuid)
    }

    pub fn timestamp() -> Self {
        Self::new(ColumnType::Timestamp)
    }

    pub fn json() -> Self {
        Self::new(ColumnType::Json)
    }

    /// Mark as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the numeric lower bound.
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Set the numeric upper bound.
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Set the minimum string length.
    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    /// Set the maximum string length.
    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Set the pattern string values must match.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Set a static default.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Static(value.into()));
        self
    }

    /// Set a generated default.
    pub fn generated(mut self, generator: Generator) -> Self {
        self.default = Some(DefaultValue::Generated { generate: generator });
        self
    }

    /// Check if this column has a default value.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// The implicit primary column every table carries.
    pub fn implicit_id() -> Self {
        Self::uuid().required().generated(Generator::Uuid)
    }
}
