//! Core value types.
//!
//! - [`ColumnType`] - the closed set of value kinds a column can hold
//! - [`Property`] - one declared column of a model
//! - [`DefaultValue`] - literal or generated default
//! - [`Record`] and path helpers in [`record`]
//!
//! # Example
//!
//! ```
//! use strata_orm::types::{ColumnType, Property};
//! use serde_json::json;
//!
//! let name = Property::string().required();
//! assert!(name.required);
//!
//! let age = Property::integer();
//! assert_eq!(age.normalize(&json!("27")).unwrap(), json!(27));
//! assert!(age.normalize(&json!("old")).is_err());
//!
//! let tags = Property::new(ColumnType::string()).array();
//! assert_eq!(tags.type_name(), "[string]");
//! ```

pub mod record;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ValidationError;

pub use record::Record;

/// The kinds of value a column can hold.
///
/// Compilers and codecs match this exhaustively, so adding a kind means every
/// backend must decide how to store it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Short string, optionally bounded.
    String { length: Option<u32> },
    /// Double-precision number.
    Number,
    /// Boolean.
    Boolean,
    /// 64-bit integer.
    Integer,
    /// Timestamp with millisecond precision, exchanged as RFC 3339 text.
    Date,
    /// Arbitrary JSON object.
    Object,
    /// Unbounded text.
    Text,
    /// `[longitude, latitude]` pair.
    GeoPoint,
    /// Identifier of a record in another (or the same) model.
    RecordId,
}

impl ColumnType {
    /// Unbounded short string.
    pub fn string() -> Self {
        ColumnType::String { length: None }
    }

    /// Short string with a maximum length.
    pub fn string_with_length(length: u32) -> Self {
        ColumnType::String {
            length: Some(length),
        }
    }

    /// Returns the type name used in messages.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::String { .. } => "string",
            ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Date => "date",
            ColumnType::Object => "object",
            ColumnType::Text => "text",
            ColumnType::GeoPoint => "geopoint",
            ColumnType::RecordId => "recordid",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Default value of a column: a literal, or a generator evaluated per record.
#[derive(Clone)]
pub enum DefaultValue {
    Literal(Value),
    Generator(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    /// Produces the value to store.
    pub fn resolve(&self) -> Value {
        match self {
            DefaultValue::Literal(value) => value.clone(),
            DefaultValue::Generator(generate) => generate(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            DefaultValue::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// One declared column.
///
/// `name` is the logical (possibly dotted) name used by application code;
/// `storage_name` is what the backend sees. Both are fixed once the column is
/// attached to a model.
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub storage_name: String,
    pub column_type: ColumnType,
    pub array: bool,
    pub required: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub default: Option<DefaultValue>,
}

impl Property {
    /// Creates an unattached property of the given type.
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            name: String::new(),
            storage_name: String::new(),
            column_type,
            array: false,
            required: false,
            primary_key: false,
            unique: false,
            default: None,
        }
    }

    pub fn string() -> Self {
        Self::new(ColumnType::string())
    }

    pub fn number() -> Self {
        Self::new(ColumnType::Number)
    }

    pub fn integer() -> Self {
        Self::new(ColumnType::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(ColumnType::Boolean)
    }

    pub fn date() -> Self {
        Self::new(ColumnType::Date)
    }

    pub fn object() -> Self {
        Self::new(ColumnType::Object)
    }

    pub fn text() -> Self {
        Self::new(ColumnType::Text)
    }

    pub fn geopoint() -> Self {
        Self::new(ColumnType::GeoPoint)
    }

    pub fn record_id() -> Self {
        Self::new(ColumnType::RecordId)
    }

    /// The implicit `id` column every model carries.
    pub(crate) fn primary_id() -> Self {
        let mut property = Self::new(ColumnType::RecordId);
        property.name = "id".to_string();
        property.storage_name = "id".to_string();
        property.primary_key = true;
        property
    }

    /// Marks the column as NOT NULL.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Adds an implicit unique index on the column.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Makes the column hold a list of values of its type.
    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    /// Overrides the name the backend sees.
    pub fn storage_name(mut self, name: impl Into<String>) -> Self {
        self.storage_name = name.into();
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(DefaultValue::Literal(value));
        self
    }

    pub fn default_with<F>(mut self, generate: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Generator(Arc::new(generate)));
        self
    }

    /// Returns the type name, bracketed for array columns.
    pub fn type_name(&self) -> String {
        if self.array {
            format!("[{}]", self.column_type.name())
        } else {
            self.column_type.name().to_string()
        }
    }

    /// Coerces a model value into the canonical JSON shape for this column.
    ///
    /// Null always passes; required checks happen elsewhere.
    pub fn normalize(&self, value: &Value) -> Result<Value, ValidationError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        if self.array {
            let items = value.as_array().ok_or_else(|| self.invalid())?;
            let normalized = items
                .iter()
                .map(|item| self.normalize_scalar(item))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Value::Array(normalized));
        }
        self.normalize_scalar(value)
    }

    fn normalize_scalar(&self, value: &Value) -> Result<Value, ValidationError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match &self.column_type {
            ColumnType::String { .. } | ColumnType::Text => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(self.invalid()),
            },
            ColumnType::Number => match value {
                Value::Number(n) => n
                    .as_f64()
                    .map(Value::from)
                    .ok_or_else(|| self.invalid()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .map(Value::from)
                    .ok_or_else(|| self.invalid()),
                _ => Err(self.invalid()),
            },
            ColumnType::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .map(Value::from)
                    .ok_or_else(|| self.invalid()),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| self.invalid()),
                _ => Err(self.invalid()),
            },
            ColumnType::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Ok(Value::Bool(false)),
                    Some(1) => Ok(Value::Bool(true)),
                    _ => Err(self.invalid()),
                },
                Value::String(s) => match s.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(self.invalid()),
                },
                _ => Err(self.invalid()),
            },
            ColumnType::Date => record::parse_date(value)
                .map(|dt| record::format_date(&dt))
                .ok_or_else(|| self.invalid()),
            ColumnType::Object => Ok(value.clone()),
            ColumnType::GeoPoint => match value.as_array() {
                Some(pair) if pair.len() == 2 && pair.iter().all(Value::is_number) => {
                    Ok(value.clone())
                }
                _ => Err(self.invalid()),
            },
            ColumnType::RecordId => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                Value::String(s) => Ok(s
                    .parse::<i64>()
                    .map(Value::from)
                    .unwrap_or_else(|_| value.clone())),
                _ => Err(self.invalid()),
            },
        }
    }

    fn invalid(&self) -> ValidationError {
        ValidationError::InvalidValue {
            column: self.name.clone(),
            expected: self.column_type.name().to_string(),
        }
    }
}
