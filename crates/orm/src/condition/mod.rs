//! Backend-neutral condition trees.
//!
//! A [`Condition`] describes which records a query, update or delete targets.
//! It can be built with the typed constructors or parsed from the JSON form
//! application code usually writes:
//!
//! ```text
//! Condition := {field: Leaf, ...}          implicit conjunction per key
//!            | [Condition, ...]            implicit conjunction
//!            | {"$and": [Condition, ...]}
//!            | {"$or":  [Condition, ...]}
//! Leaf      := literal | [literal, ...]    equality | membership
//!            | {"$gt"|"$lt"|"$gte"|"$lte": literal}
//!            | {"$not": Leaf}
//!            | {"$in": [literal, ...]}
//!            | {"$contains": literal | [literal, ...]}
//!            | {"$startswith": literal} | {"$endswith": literal}
//!            | {"$regex": "pattern"} | {"$regex": {"pattern": "...", "flags": "i"}}
//! ```
//!
//! Operator objects carry exactly one key. Parsing is schema-free; column
//! names are checked when a compiler resolves them against a model.
//!
//! # Example
//!
//! ```
//! use strata_orm::condition::{Condition, Leaf};
//! use serde_json::json;
//!
//! let parsed = Condition::parse(&json!({"name": "John", "age": {"$gt": 20}})).unwrap();
//! let built = Condition::and(vec![
//!     Condition::eq("name", json!("John")),
//!     Condition::field("age", Leaf::gt(json!(20))),
//! ]);
//! assert_eq!(parsed, built);
//! ```

mod group;
mod query;
mod update;

pub use group::{Aggregate, GroupField, GroupSpec};
pub use query::{OrderBy, Query};
pub use update::{UpdateOp, UpdateSpec};

use serde_json::{Map, Value};

use crate::error::{QueryError, StorageResult};
use crate::types::Record;

/// A condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Every child must match. An empty conjunction matches everything.
    And(Vec<Condition>),
    /// At least one child must match. An empty disjunction matches nothing.
    Or(Vec<Condition>),
    /// A test on one column.
    Field { column: String, leaf: Leaf },
}

/// The test applied to a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum Leaf {
    /// Equality; `null` tests for absence. A plain object on a nested prefix
    /// is expanded to one equality per dotted column.
    Eq(Value),
    /// Membership; an empty list matches nothing.
    In(Vec<Value>),
    Regex(ConditionRegex),
    Op(Operator),
}

/// A regular expression leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionRegex {
    pub pattern: String,
    pub case_insensitive: bool,
}

/// A single-key operator object.
#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Gt(Value),
    Lt(Value),
    Gte(Value),
    Lte(Value),
    /// Matches rows where the inner leaf does not match, including rows
    /// where the column is null.
    Not(Box<Leaf>),
    In(Vec<Value>),
    /// Case-insensitive substring test; an array of needles matches any of them.
    Contains(Value),
    StartsWith(Value),
    EndsWith(Value),
}

impl Operator {
    /// The DSL key for this operator.
    pub fn key(&self) -> &'static str {
        match self {
            Operator::Gt(_) => "$gt",
            Operator::Lt(_) => "$lt",
            Operator::Gte(_) => "$gte",
            Operator::Lte(_) => "$lte",
            Operator::Not(_) => "$not",
            Operator::In(_) => "$in",
            Operator::Contains(_) => "$contains",
            Operator::StartsWith(_) => "$startswith",
            Operator::EndsWith(_) => "$endswith",
        }
    }
}

impl Condition {
    /// Matches every record.
    pub fn all() -> Self {
        Condition::And(Vec::new())
    }

    pub fn and(children: Vec<Condition>) -> Self {
        Condition::And(children)
    }

    pub fn or(children: Vec<Condition>) -> Self {
        Condition::Or(children)
    }

    pub fn field(column: impl Into<String>, leaf: Leaf) -> Self {
        Condition::Field {
            column: column.into(),
            leaf,
        }
    }

    /// Equality, or membership when `value` is an array.
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::field(column, Leaf::literal(value))
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::field(column, Leaf::In(values))
    }

    /// Matches the record with the given identifier.
    pub fn id(id: Value) -> Self {
        Self::eq("id", id)
    }

    /// True when the condition places no restriction.
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::And(children) => children.iter().all(Condition::is_empty),
            _ => false,
        }
    }

    /// Parses the JSON form. `null` and `{}` mean "no condition".
    pub fn parse(value: &Value) -> StorageResult<Self> {
        match value {
            Value::Null => Ok(Condition::all()),
            Value::Array(items) => Ok(Condition::And(
                items.iter().map(Condition::parse).collect::<StorageResult<_>>()?,
            )),
            Value::Object(map) => match map.len() {
                0 => Ok(Condition::all()),
                1 => {
                    let (key, value) = map.iter().next().ok_or_else(|| {
                        QueryError::InvalidCondition("empty object".to_string())
                    })?;
                    Self::parse_entry(key, value)
                }
                _ => Ok(Condition::And(
                    map.iter()
                        .map(|(key, value)| Self::parse_entry(key, value))
                        .collect::<StorageResult<_>>()?,
                )),
            },
            other => Err(QueryError::InvalidCondition(format!(
                "expected an object or a list, got {}",
                other
            ))
            .into()),
        }
    }

    fn parse_entry(key: &str, value: &Value) -> StorageResult<Self> {
        match key {
            "$and" | "$or" => {
                let children = match value {
                    Value::Array(items) => items
                        .iter()
                        .map(Condition::parse)
                        .collect::<StorageResult<Vec<_>>>()?,
                    Value::Object(_) => vec![Condition::parse(value)?],
                    _ => {
                        return Err(QueryError::InvalidCondition(format!(
                            "'{}' expects a list of conditions",
                            key
                        ))
                        .into());
                    }
                };
                Ok(if key == "$and" {
                    Condition::And(children)
                } else {
                    Condition::Or(children)
                })
            }
            _ if key.starts_with('$') => Err(QueryError::UnknownOperator(key.to_string()).into()),
            _ => Ok(Condition::Field {
                column: key.to_string(),
                leaf: Leaf::parse(value)?,
            }),
        }
    }

    /// Renders the condition back to its JSON form.
    pub fn to_value(&self) -> Value {
        match self {
            Condition::And(children) => Value::Object(single(
                "$and",
                children.iter().map(Condition::to_value).collect::<Vec<_>>(),
            )),
            Condition::Or(children) => Value::Object(single(
                "$or",
                children.iter().map(Condition::to_value).collect::<Vec<_>>(),
            )),
            Condition::Field { column, leaf } => Value::Object(single(column, leaf.to_value())),
        }
    }

    /// Columns fixed by top-level equality leaves.
    ///
    /// Walks conjunctions only; used to seed the record an upsert inserts.
    pub fn equality_fields(&self) -> Record {
        let mut fields = Record::new();
        self.collect_equalities(&mut fields);
        fields
    }

    fn collect_equalities(&self, fields: &mut Record) {
        match self {
            Condition::And(children) => {
                for child in children {
                    child.collect_equalities(fields);
                }
            }
            Condition::Field {
                column,
                leaf: Leaf::Eq(value),
            } if !value.is_object() => {
                crate::types::record::set_path(fields, column, value.clone());
            }
            _ => {}
        }
    }
}

impl Leaf {
    /// Equality for scalars, membership for arrays.
    pub fn literal(value: Value) -> Self {
        match value {
            Value::Array(items) => Leaf::In(items),
            other => Leaf::Eq(other),
        }
    }

    pub fn gt(value: Value) -> Self {
        Leaf::Op(Operator::Gt(value))
    }

    pub fn lt(value: Value) -> Self {
        Leaf::Op(Operator::Lt(value))
    }

    pub fn gte(value: Value) -> Self {
        Leaf::Op(Operator::Gte(value))
    }

    pub fn lte(value: Value) -> Self {
        Leaf::Op(Operator::Lte(value))
    }

    pub fn not(inner: Leaf) -> Self {
        Leaf::Op(Operator::Not(Box::new(inner)))
    }

    pub fn contains(needle: Value) -> Self {
        Leaf::Op(Operator::Contains(needle))
    }

    pub fn starts_with(prefix: Value) -> Self {
        Leaf::Op(Operator::StartsWith(prefix))
    }

    pub fn ends_with(suffix: Value) -> Self {
        Leaf::Op(Operator::EndsWith(suffix))
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Leaf::Regex(ConditionRegex {
            pattern: pattern.into(),
            case_insensitive: false,
        })
    }

    pub fn regex_ci(pattern: impl Into<String>) -> Self {
        Leaf::Regex(ConditionRegex {
            pattern: pattern.into(),
            case_insensitive: true,
        })
    }

    /// Parses a leaf value.
    pub fn parse(value: &Value) -> StorageResult<Self> {
        let map = match value {
            Value::Object(map) => map,
            other => return Ok(Leaf::literal(other.clone())),
        };

        let operator_keys = map.keys().filter(|k| k.starts_with('$')).count();
        if operator_keys == 0 {
            if map.is_empty() {
                return Err(QueryError::InvalidCondition("empty operator object".to_string()).into());
            }
            return Ok(Leaf::Eq(value.clone()));
        }
        if map.len() != 1 {
            return Err(QueryError::InvalidCondition(format!(
                "operator object must have exactly one key: {}",
                value
            ))
            .into());
        }

        let (key, operand) = map.iter().next().ok_or_else(|| {
            QueryError::InvalidCondition("empty operator object".to_string())
        })?;
        let leaf = match key.as_str() {
            "$gt" => Leaf::gt(scalar(key, operand)?),
            "$lt" => Leaf::lt(scalar(key, operand)?),
            "$gte" => Leaf::gte(scalar(key, operand)?),
            "$lte" => Leaf::lte(scalar(key, operand)?),
            "$not" => Leaf::not(Leaf::parse(operand)?),
            "$in" => match operand {
                Value::Array(items) => Leaf::Op(Operator::In(items.clone())),
                _ => {
                    return Err(
                        QueryError::InvalidCondition("'$in' expects a list".to_string()).into(),
                    );
                }
            },
            "$contains" => Leaf::contains(operand.clone()),
            "$startswith" => Leaf::starts_with(scalar(key, operand)?),
            "$endswith" => Leaf::ends_with(scalar(key, operand)?),
            "$regex" => Leaf::Regex(parse_regex(operand)?),
            other => return Err(QueryError::UnknownOperator(other.to_string()).into()),
        };
        Ok(leaf)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Leaf::Eq(value) => value.clone(),
            Leaf::In(values) => Value::Array(values.clone()),
            Leaf::Regex(regex) => {
                let mut inner = Map::new();
                inner.insert("pattern".to_string(), Value::String(regex.pattern.clone()));
                if regex.case_insensitive {
                    inner.insert("flags".to_string(), Value::String("i".to_string()));
                }
                Value::Object(single("$regex", Value::Object(inner)))
            }
            Leaf::Op(op) => {
                let operand = match op {
                    Operator::Gt(v)
                    | Operator::Lt(v)
                    | Operator::Gte(v)
                    | Operator::Lte(v)
                    | Operator::Contains(v)
                    | Operator::StartsWith(v)
                    | Operator::EndsWith(v) => v.clone(),
                    Operator::Not(inner) => inner.to_value(),
                    Operator::In(values) => Value::Array(values.clone()),
                };
                Value::Object(single(op.key(), operand))
            }
        }
    }
}

fn single(key: &str, value: impl Into<Value>) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value.into());
    map
}

fn scalar(key: &str, operand: &Value) -> StorageResult<Value> {
    match operand {
        Value::Array(_) | Value::Object(_) => Err(QueryError::InvalidCondition(format!(
            "'{}' expects a single value",
            key
        ))
        .into()),
        other => Ok(other.clone()),
    }
}

fn parse_regex(operand: &Value) -> StorageResult<ConditionRegex> {
    match operand {
        Value::String(pattern) => Ok(ConditionRegex {
            pattern: pattern.clone(),
            case_insensitive: false,
        }),
        Value::Object(map) => {
            let pattern = map
                .get("pattern")
                .and_then(Value::as_str)
                .ok_or_else(|| QueryError::InvalidCondition("'$regex' needs a pattern".to_string()))?;
            let flags = map.get("flags").and_then(Value::as_str).unwrap_or("");
            if let Some(flag) = flags.chars().find(|c| *c != 'i') {
                return Err(
                    QueryError::InvalidCondition(format!("unsupported regex flag '{}'", flag))
                        .into(),
                );
            }
            Ok(ConditionRegex {
                pattern: pattern.to_string(),
                case_insensitive: flags.contains('i'),
            })
        }
        _ => Err(QueryError::InvalidCondition("'$regex' expects a pattern".to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_implicit_and_explicit_conjunctions() {
        let list = Condition::parse(&json!([{"name": "John"}, {"age": 27}])).unwrap();
        let explicit =
            Condition::parse(&json!({"$and": [{"name": "John"}, {"age": 27}]})).unwrap();
        let merged = Condition::parse(&json!({"age": 27, "name": "John"})).unwrap();

        let expected = Condition::and(vec![
            Condition::eq("name", json!("John")),
            Condition::eq("age", json!(27)),
        ]);
        assert_eq!(list, expected);
        assert_eq!(explicit, expected);
        assert_eq!(
            merged,
            Condition::and(vec![
                Condition::eq("age", json!(27)),
                Condition::eq("name", json!("John")),
            ])
        );
    }

    #[test]
    fn test_array_leaf_is_membership() {
        let condition = Condition::parse(&json!({"age": [27, 45]})).unwrap();
        assert_eq!(condition, Condition::is_in("age", vec![json!(27), json!(45)]));
    }

    #[test]
    fn test_operators() {
        let condition = Condition::parse(&json!({
            "name": {"$not": {"$contains": ["smi", "doe"]}}
        }))
        .unwrap();
        assert_eq!(
            condition,
            Condition::field("name", Leaf::not(Leaf::contains(json!(["smi", "doe"]))))
        );

        let condition =
            Condition::parse(&json!({"name": {"$regex": {"pattern": "^j", "flags": "i"}}}))
                .unwrap();
        assert_eq!(condition, Condition::field("name", Leaf::regex_ci("^j")));
    }

    #[test]
    fn test_operator_object_must_have_one_key() {
        let err = Condition::parse(&json!({"age": {"$gt": 1, "$lt": 5}})).unwrap_err();
        assert!(matches!(
            err,
            crate::error::StorageError::Query(QueryError::InvalidCondition(_))
        ));

        let err = Condition::parse(&json!({"age": {"$between": [1, 5]}})).unwrap_err();
        assert_eq!(err.to_string(), "unknown operator '$between'");

        let err = Condition::parse(&json!({"$nor": []})).unwrap_err();
        assert_eq!(err.to_string(), "unknown operator '$nor'");
    }

    #[test]
    fn test_empty_conditions() {
        assert!(Condition::parse(&Value::Null).unwrap().is_empty());
        assert!(Condition::parse(&json!({})).unwrap().is_empty());
        assert!(Condition::parse(&json!([[], {}])).unwrap().is_empty());
        assert!(!Condition::or(vec![]).is_empty());
    }

    #[test]
    fn test_to_value_reparses() {
        let source = json!({"$or": [
            {"age": {"$gte": 18}},
            {"name": {"$not": null}},
            {"tag": {"$regex": {"pattern": "a.c"}}}
        ]});
        let condition = Condition::parse(&source).unwrap();
        assert_eq!(Condition::parse(&condition.to_value()).unwrap(), condition);
    }

    #[test]
    fn test_equality_fields_follow_conjunctions_only() {
        let condition = Condition::parse(&json!({
            "name": "John",
            "address.city": "Paris",
            "age": {"$gt": 3},
            "$or": [{"x": 1}]
        }))
        .unwrap();
        let fields = condition.equality_fields();
        assert_eq!(
            Value::Object(fields),
            json!({"name": "John", "address": {"city": "Paris"}})
        );
    }
}
