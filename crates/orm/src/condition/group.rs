//! Grouping and aggregate expressions.

use serde_json::Value;

use crate::error::{QueryError, StorageResult};

/// An aggregate over the rows of one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregate {
    /// `{"$sum": 1}`
    Count,
    /// `{"$sum": "$column"}`
    Sum(String),
    /// `{"$min": "$column"}`
    Min(String),
    /// `{"$max": "$column"}`
    Max(String),
}

impl Aggregate {
    /// The column the aggregate reads, if any.
    pub fn column(&self) -> Option<&str> {
        match self {
            Aggregate::Count => None,
            Aggregate::Sum(c) | Aggregate::Min(c) | Aggregate::Max(c) => Some(c),
        }
    }
}

/// An output field of a grouped query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupField {
    pub name: String,
    pub aggregate: Aggregate,
}

/// Group-by columns plus aggregate output fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSpec {
    pub by: Vec<String>,
    pub fields: Vec<GroupField>,
}

impl GroupSpec {
    pub fn new<S: Into<String>>(by: impl IntoIterator<Item = S>) -> Self {
        Self {
            by: by.into_iter().map(Into::into).collect(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, aggregate: Aggregate) -> Self {
        self.fields.push(GroupField {
            name: name.into(),
            aggregate,
        });
        self
    }

    /// Parses aggregate fields of the form `{"total": {"$sum": "$price"}, "count": {"$sum": 1}}`.
    pub fn parse<S: Into<String>>(
        by: impl IntoIterator<Item = S>,
        fields: &Value,
    ) -> StorageResult<Self> {
        let mut spec = GroupSpec::new(by);
        let Some(map) = fields.as_object() else {
            if fields.is_null() {
                return Ok(spec);
            }
            return Err(QueryError::InvalidCondition(format!(
                "group fields must be an object, got {}",
                fields
            ))
            .into());
        };
        for (name, expression) in map {
            spec.fields.push(GroupField {
                name: name.clone(),
                aggregate: parse_aggregate(name, expression)?,
            });
        }
        Ok(spec)
    }
}

fn parse_aggregate(field: &str, expression: &Value) -> StorageResult<Aggregate> {
    let invalid = |message: &str| QueryError::InvalidGroupField {
        field: field.to_string(),
        message: message.to_string(),
    };
    let map = expression
        .as_object()
        .filter(|m| m.len() == 1)
        .ok_or_else(|| invalid("expected a single aggregate operator"))?;
    let (op, operand) = map
        .iter()
        .next()
        .ok_or_else(|| invalid("expected a single aggregate operator"))?;

    if !matches!(op.as_str(), "$sum" | "$min" | "$max") {
        return Err(QueryError::UnknownOperator(op.clone()).into());
    }
    if op == "$sum" && operand.as_i64() == Some(1) {
        return Ok(Aggregate::Count);
    }
    let column = operand
        .as_str()
        .and_then(|s| s.strip_prefix('$'))
        .filter(|c| !c.is_empty())
        .ok_or_else(|| invalid("operand must be a \"$column\" reference"))?
        .to_string();
    Ok(match op.as_str() {
        "$sum" => Aggregate::Sum(column),
        "$min" => Aggregate::Min(column),
        _ => Aggregate::Max(column),
    })
}
