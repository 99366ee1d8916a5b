//! Parameterized SQL compilation.
//!
//! A [`SqlCompiler`] owns the parameter accumulator for one statement.
//! Conditions, group clauses and ordering compiled through the same compiler
//! share numbering, so placeholders appear in the order their values are
//! pushed.
//!
//! Negation follows SQL's three-valued logic in one specific way: `$not X`
//! compiles to `(NOT (X) OR "col" IS NULL)`, so a row whose column is NULL
//! matches the negation. Applying `$not` twice therefore does not give back
//! the positive form; NULL rows match both.

mod dialect;

pub use dialect::{PostgresDialect, SqlDialect, SqliteDialect};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::condition::{Aggregate, Condition, GroupSpec, Leaf, Operator, OrderBy};
use crate::core::BackendCapability;
use crate::error::{QueryError, StorageError, StorageResult};
use crate::schema::ModelSchema;
use crate::types::record::{format_date, parse_date};
use crate::types::{ColumnType, Property};

/// A fragment of SQL with bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl SqlFragment {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// A value crossing the SQL boundary, bound as a parameter or read from a row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Float(f64),
    Integer(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Json(Value),
    Null,
}

impl SqlParam {
    pub fn text(s: impl Into<String>) -> Self {
        SqlParam::Text(s.into())
    }
}

/// Converts a model value into the parameter stored for `property`.
pub fn to_param(property: &Property, value: &Value) -> StorageResult<SqlParam> {
    let value = property.normalize(value)?;
    if value.is_null() {
        return Ok(SqlParam::Null);
    }
    if property.array {
        return Ok(SqlParam::Json(value));
    }
    let mismatch = || {
        StorageError::unexpected(format!(
            "cannot bind {} as {}",
            value,
            property.type_name()
        ))
    };
    Ok(match &property.column_type {
        ColumnType::String { .. } | ColumnType::Text => {
            SqlParam::Text(value.as_str().ok_or_else(mismatch)?.to_string())
        }
        ColumnType::Number => SqlParam::Float(value.as_f64().ok_or_else(mismatch)?),
        ColumnType::Integer => SqlParam::Integer(value.as_i64().ok_or_else(mismatch)?),
        ColumnType::Boolean => SqlParam::Bool(value.as_bool().ok_or_else(mismatch)?),
        ColumnType::Date => SqlParam::Timestamp(parse_date(&value).ok_or_else(mismatch)?),
        ColumnType::Object | ColumnType::GeoPoint => SqlParam::Json(value),
        ColumnType::RecordId => match &value {
            Value::Number(n) => SqlParam::Integer(n.as_i64().ok_or_else(mismatch)?),
            Value::String(s) => SqlParam::Text(s.clone()),
            _ => return Err(mismatch()),
        },
    })
}

/// Converts a stored value back into the model value for `property`.
///
/// Accepts every shape a relational driver produces for the column's native
/// type: text-encoded JSON and dates, integer booleans, integral floats.
pub fn from_param(property: &Property, param: SqlParam) -> StorageResult<Value> {
    let unexpected = |param: &SqlParam| {
        StorageError::unexpected(format!(
            "column '{}' holds {:?}, expected {}",
            property.name,
            param,
            property.type_name()
        ))
    };
    if matches!(param, SqlParam::Null) {
        return Ok(Value::Null);
    }
    if property.array {
        return match param {
            SqlParam::Json(value) => Ok(value),
            SqlParam::Text(s) => Ok(serde_json::from_str(&s)?),
            other => Err(unexpected(&other)),
        };
    }
    match (&property.column_type, param) {
        (ColumnType::String { .. } | ColumnType::Text, SqlParam::Text(s)) => {
            Ok(Value::String(s))
        }
        (ColumnType::Number, SqlParam::Float(f)) => Ok(Value::from(f)),
        (ColumnType::Number, SqlParam::Integer(i)) => Ok(Value::from(i as f64)),
        (ColumnType::Integer, SqlParam::Integer(i)) => Ok(Value::from(i)),
        (ColumnType::Integer, SqlParam::Float(f)) if f.fract() == 0.0 => {
            Ok(Value::from(f as i64))
        }
        (ColumnType::Boolean, SqlParam::Bool(b)) => Ok(Value::Bool(b)),
        (ColumnType::Boolean, SqlParam::Integer(i)) => Ok(Value::Bool(i != 0)),
        (ColumnType::Date, SqlParam::Timestamp(dt)) => Ok(format_date(&dt)),
        (ColumnType::Date, param @ (SqlParam::Text(_) | SqlParam::Integer(_))) => {
            let raw = match &param {
                SqlParam::Text(s) => Value::String(s.clone()),
                SqlParam::Integer(i) => Value::from(*i),
                _ => Value::Null,
            };
            parse_date(&raw)
                .map(|dt| format_date(&dt))
                .ok_or_else(|| unexpected(&param))
        }
        (ColumnType::Object | ColumnType::GeoPoint, SqlParam::Json(value)) => Ok(value),
        (ColumnType::Object | ColumnType::GeoPoint, SqlParam::Text(s)) => {
            Ok(serde_json::from_str(&s)?)
        }
        (ColumnType::RecordId, SqlParam::Integer(i)) => Ok(Value::from(i)),
        (ColumnType::RecordId, SqlParam::Text(s)) => Ok(Value::String(s)),
        (_, other) => Err(unexpected(&other)),
    }
}

/// Compiles conditions, grouping and ordering for one statement.
#[derive(Debug)]
pub struct SqlCompiler<'a> {
    dialect: &'a dyn SqlDialect,
    schema: &'a ModelSchema,
    params: Vec<SqlParam>,
}

/// Select list and `GROUP BY` clause of a grouped query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupClause {
    pub select: String,
    /// Empty when aggregating over all rows.
    pub group_by: String,
}

impl<'a> SqlCompiler<'a> {
    pub fn new(dialect: &'a dyn SqlDialect, schema: &'a ModelSchema) -> Self {
        Self {
            dialect,
            schema,
            params: Vec::new(),
        }
    }

    pub fn dialect(&self) -> &'a dyn SqlDialect {
        self.dialect
    }

    pub fn schema(&self) -> &'a ModelSchema {
        self.schema
    }

    /// Appends a parameter and returns its placeholder.
    pub fn push_param(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        self.dialect.placeholder(self.params.len())
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    pub fn into_params(self) -> Vec<SqlParam> {
        self.params
    }

    /// Resolves a logical column to its property and quoted storage name.
    pub fn column(&self, name: &str) -> StorageResult<(&'a Property, String)> {
        let property = self
            .schema
            .property(name)
            .ok_or_else(|| QueryError::UnknownColumn(name.to_string()))?;
        Ok((property, self.dialect.quote(&property.storage_name)))
    }

    /// ` WHERE ...`, or an empty string for an empty condition.
    pub fn where_clause(&mut self, condition: &Condition) -> StorageResult<String> {
        let sql = self.compile_condition(condition)?;
        Ok(if sql.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", sql)
        })
    }

    /// Compiles a condition to a boolean SQL expression.
    ///
    /// Returns an empty string when the condition places no restriction.
    pub fn compile_condition(&mut self, condition: &Condition) -> StorageResult<String> {
        match condition {
            Condition::And(children) => {
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    let sql = self.compile_condition(child)?;
                    if !sql.is_empty() {
                        parts.push(sql);
                    }
                }
                Ok(match parts.len() {
                    0 => String::new(),
                    1 => parts.remove(0),
                    _ => join_wrapped(&parts, " AND "),
                })
            }
            Condition::Or(children) => {
                if children.is_empty() {
                    return Ok(self.dialect.false_literal().to_string());
                }
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    let sql = self.compile_condition(child)?;
                    if sql.is_empty() {
                        parts.push(self.dialect.true_literal().to_string());
                    } else {
                        parts.push(sql);
                    }
                }
                Ok(if parts.len() == 1 {
                    parts.remove(0)
                } else {
                    join_wrapped(&parts, " OR ")
                })
            }
            Condition::Field { column, leaf } => self.compile_field(column, leaf),
        }
    }

    fn compile_field(&mut self, column: &str, leaf: &Leaf) -> StorageResult<String> {
        if self.schema.is_nested_prefix(column) {
            if let Leaf::Eq(Value::Object(map)) = leaf {
                let expanded = Condition::And(
                    map.iter()
                        .map(|(key, value)| {
                            Condition::field(
                                format!("{}.{}", column, key),
                                Leaf::literal(value.clone()),
                            )
                        })
                        .collect(),
                );
                return self.compile_condition(&expanded);
            }
        }
        let (property, quoted) = self.column(column)?;
        self.compile_leaf(property, &quoted, leaf)
    }

    fn compile_leaf(
        &mut self,
        property: &Property,
        column: &str,
        leaf: &Leaf,
    ) -> StorageResult<String> {
        match leaf {
            Leaf::Eq(Value::Null) => Ok(format!("{} IS NULL", column)),
            Leaf::Eq(Value::Array(values)) | Leaf::In(values) => {
                self.compile_in(property, column, values)
            }
            Leaf::Eq(value) => {
                let placeholder = self.push_param(to_param(property, value)?);
                Ok(format!("{} = {}", column, placeholder))
            }
            Leaf::Regex(regex) => {
                let operator = self
                    .dialect
                    .regex_operator(regex.case_insensitive)
                    .ok_or_else(|| {
                        StorageError::unsupported(
                            self.dialect.name(),
                            BackendCapability::RegexMatch.to_string(),
                        )
                    })?;
                let placeholder = self.push_param(SqlParam::text(regex.pattern.clone()));
                Ok(format!("{} {} {}", column, operator, placeholder))
            }
            Leaf::Op(op) => self.compile_operator(property, column, op),
        }
    }

    fn compile_operator(
        &mut self,
        property: &Property,
        column: &str,
        op: &Operator,
    ) -> StorageResult<String> {
        let comparison =
            |compiler: &mut Self, symbol: &str, value: &Value| -> StorageResult<String> {
                let placeholder = compiler.push_param(to_param(property, value)?);
                Ok(format!("{} {} {}", column, symbol, placeholder))
            };
        match op {
            Operator::Gt(value) => comparison(self, ">", value),
            Operator::Lt(value) => comparison(self, "<", value),
            Operator::Gte(value) => comparison(self, ">=", value),
            Operator::Lte(value) => comparison(self, "<=", value),
            Operator::In(values) => self.compile_in(property, column, values),
            Operator::Contains(Value::Array(needles)) => {
                if needles.is_empty() {
                    return Ok(self.dialect.false_literal().to_string());
                }
                let mut parts = Vec::with_capacity(needles.len());
                for needle in needles {
                    parts.push(self.compile_like(column, "%", needle, "%")?);
                }
                Ok(if parts.len() == 1 {
                    parts.remove(0)
                } else {
                    format!("({})", parts.join(" OR "))
                })
            }
            Operator::Contains(needle) => self.compile_like(column, "%", needle, "%"),
            Operator::StartsWith(prefix) => self.compile_like(column, "", prefix, "%"),
            Operator::EndsWith(suffix) => self.compile_like(column, "%", suffix, ""),
            Operator::Not(inner) => match inner.as_ref() {
                Leaf::Eq(Value::Null) => Ok(format!("NOT {} IS NULL", column)),
                inner => {
                    let positive = self.compile_leaf(property, column, inner)?;
                    Ok(format!("(NOT ({}) OR {} IS NULL)", positive, column))
                }
            },
        }
    }

    fn compile_in(
        &mut self,
        property: &Property,
        column: &str,
        values: &[Value],
    ) -> StorageResult<String> {
        if values.is_empty() {
            return Ok(self.dialect.false_literal().to_string());
        }
        let mut placeholders = Vec::with_capacity(values.len());
        for value in values {
            placeholders.push(self.push_param(to_param(property, value)?));
        }
        Ok(format!("{} IN ({})", column, placeholders.join(", ")))
    }

    // `%` and `_` inside the needle are not escaped and keep their wildcard meaning.
    fn compile_like(
        &mut self,
        column: &str,
        before: &str,
        needle: &Value,
        after: &str,
    ) -> StorageResult<String> {
        let needle = match needle {
            Value::String(s) => s.clone(),
            Value::Number(_) | Value::Bool(_) => needle.to_string(),
            other => {
                return Err(QueryError::InvalidCondition(format!(
                    "pattern operand must be a literal, got {}",
                    other
                ))
                .into());
            }
        };
        let placeholder =
            self.push_param(SqlParam::Text(format!("{}{}{}", before, needle, after)));
        Ok(format!(
            "{} {} {}",
            column,
            self.dialect.contains_operator(),
            placeholder
        ))
    }

    /// Resolves aggregate fields into a select list and `GROUP BY` clause.
    pub fn build_group(&mut self, group: &GroupSpec) -> StorageResult<GroupClause> {
        let mut select = Vec::with_capacity(group.by.len() + group.fields.len());
        let mut keys = Vec::with_capacity(group.by.len());
        for name in &group.by {
            let (_, quoted) = self.column(name)?;
            select.push(format!("{} AS {}", quoted, self.dialect.quote(name)));
            keys.push(quoted);
        }
        for field in &group.fields {
            let expression = match &field.aggregate {
                Aggregate::Count => "COUNT(*)".to_string(),
                Aggregate::Sum(column) => {
                    let (_, quoted) = self.column(column)?;
                    self.dialect.sum_expression(&quoted)
                }
                Aggregate::Min(column) => format!("MIN({})", self.column(column)?.1),
                Aggregate::Max(column) => format!("MAX({})", self.column(column)?.1),
            };
            select.push(format!("{} AS {}", expression, self.dialect.quote(&field.name)));
        }
        Ok(GroupClause {
            select: select.join(", "),
            group_by: if keys.is_empty() {
                String::new()
            } else {
                format!(" GROUP BY {}", keys.join(", "))
            },
        })
    }

    /// ` ORDER BY ...`, or an empty string.
    ///
    /// Grouped queries order by group keys or aggregate field names.
    pub fn order_clause(
        &self,
        order: &[OrderBy],
        group: Option<&GroupSpec>,
    ) -> StorageResult<String> {
        if order.is_empty() {
            return Ok(String::new());
        }
        let mut keys = Vec::with_capacity(order.len());
        for key in order {
            let column = match group {
                Some(group) => {
                    let known = group.by.iter().any(|c| c == &key.column)
                        || group.fields.iter().any(|f| f.name == key.column);
                    if !known {
                        return Err(QueryError::UnknownColumn(key.column.clone()).into());
                    }
                    self.dialect.quote(&key.column)
                }
                None => self.column(&key.column)?.1,
            };
            keys.push(format!("{} {}", column, key.direction.sql()));
        }
        Ok(format!(" ORDER BY {}", keys.join(", ")))
    }
}

fn join_wrapped(parts: &[String], separator: &str) -> String {
    parts
        .iter()
        .map(|p| format!("({})", p))
        .collect::<Vec<_>>()
        .join(separator)
}
