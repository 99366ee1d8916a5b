//! Partial update specifications.

use serde_json::Value;

use crate::error::{QueryError, StorageResult, ValidationError};
use crate::schema::ModelSchema;
use crate::types::ColumnType;

/// One column change.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set { column: String, value: Value },
    /// Adds `amount` to the current value.
    Inc { column: String, amount: Value },
}

impl UpdateOp {
    pub fn column(&self) -> &str {
        match self {
            UpdateOp::Set { column, .. } | UpdateOp::Inc { column, .. } => column,
        }
    }
}

/// The changes applied by `update_partial` and `upsert`.
///
/// Parsed from `{"name": "John", "visits": {"$inc": 1}}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSpec {
    ops: Vec<UpdateOp>,
}

impl UpdateSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: impl Into<String>, value: Value) -> Self {
        self.ops.push(UpdateOp::Set {
            column: column.into(),
            value,
        });
        self
    }

    pub fn inc(mut self, column: impl Into<String>, amount: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Inc {
            column: column.into(),
            amount: amount.into(),
        });
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Parses the JSON form.
    pub fn parse(value: &Value) -> StorageResult<Self> {
        let map = value.as_object().ok_or_else(|| {
            QueryError::InvalidCondition(format!("update must be an object, got {}", value))
        })?;
        let mut spec = UpdateSpec::new();
        for (column, value) in map {
            match value.as_object() {
                Some(inner) if inner.keys().any(|k| k.starts_with('$')) => {
                    if inner.len() != 1 {
                        return Err(QueryError::InvalidCondition(format!(
                            "update operator object must have exactly one key: {}",
                            value
                        ))
                        .into());
                    }
                    match inner.get("$inc") {
                        Some(amount) if amount.is_number() => {
                            spec = spec.inc(column.clone(), amount.clone());
                        }
                        Some(_) => {
                            return Err(QueryError::InvalidCondition(
                                "'$inc' expects a number".to_string(),
                            )
                            .into());
                        }
                        None => {
                            let key = inner.keys().next().cloned().unwrap_or_default();
                            return Err(QueryError::UnknownOperator(key).into());
                        }
                    }
                }
                _ => spec = spec.set(column.clone(), value.clone()),
            }
        }
        Ok(spec)
    }

    /// Checks every column against the model and normalizes values.
    ///
    /// Objects assigned to a nested prefix are flattened into their dotted
    /// columns. Validation failures are reported together.
    pub fn resolve(&self, schema: &ModelSchema) -> StorageResult<UpdateSpec> {
        let mut flat = Vec::with_capacity(self.ops.len());
        for op in &self.ops {
            match op {
                UpdateOp::Set { column, value } => flatten(schema, column, value, &mut flat),
                inc => flat.push(inc.clone()),
            }
        }

        let mut errors = Vec::new();
        let mut resolved = Vec::with_capacity(flat.len());
        for op in flat {
            let property = schema
                .property(op.column())
                .ok_or_else(|| QueryError::UnknownColumn(op.column().to_string()))?;
            match op {
                UpdateOp::Set { column, value } => {
                    if value.is_null() && property.required {
                        errors.push(ValidationError::Required(column));
                        continue;
                    }
                    match property.normalize(&value) {
                        Ok(value) => resolved.push(UpdateOp::Set { column, value }),
                        Err(err) => errors.push(err),
                    }
                }
                UpdateOp::Inc { column, amount } => {
                    let numeric = matches!(
                        property.column_type,
                        ColumnType::Number | ColumnType::Integer
                    );
                    if property.array || !numeric || property.normalize(&amount).is_err() {
                        errors.push(ValidationError::InvalidValue {
                            column,
                            expected: property.column_type.name().to_string(),
                        });
                        continue;
                    }
                    resolved.push(UpdateOp::Inc { column, amount });
                }
            }
        }

        match ValidationError::from_list(errors) {
            Some(err) => Err(err.into()),
            None => Ok(UpdateSpec { ops: resolved }),
        }
    }
}

fn flatten(schema: &ModelSchema, column: &str, value: &Value, out: &mut Vec<UpdateOp>) {
    match value {
        Value::Object(map) if schema.is_nested_prefix(column) => {
            for (key, inner) in map {
                flatten(schema, &format!("{}.{}", column, key), inner, out);
            }
        }
        _ => out.push(UpdateOp::Set {
            column: column.to_string(),
            value: value.clone(),
        }),
    }
}
