//! Native filter documents for document stores.
//!
//! Output is MongoDB extended JSON held in `serde_json` values, so the
//! compiler stays driver-free: identifiers become `{"$oid": ...}`, dates
//! become `{"$date": {"$numberLong": ...}}` and regular expressions become
//! `{"$regularExpression": {...}}`. The adapter converts the result to BSON.
//!
//! Nested columns keep their dotted paths (`address.city`), which document
//! stores resolve natively; `id` maps to `_id`.

use chrono::Utc;
use serde_json::{Map, Value, json};

use crate::condition::{
    Aggregate, Condition, GroupSpec, Leaf, Operator, OrderBy, Query, UpdateOp, UpdateSpec,
};
use crate::error::{QueryError, StorageError, StorageResult};
use crate::schema::ModelSchema;
use crate::types::record::{format_date, get_path, parse_date, set_path};
use crate::types::{ColumnType, Property, Record};

/// Extended JSON type wrappers. Objects keyed by these are literal values,
/// not query operators.
const TYPE_WRAPPERS: &[&str] = &[
    "$oid",
    "$date",
    "$numberLong",
    "$numberInt",
    "$numberDouble",
    "$numberDecimal",
    "$regularExpression",
];

/// Compiles conditions, updates and pipelines against one model.
#[derive(Debug, Clone, Copy)]
pub struct DocumentCompiler<'a> {
    schema: &'a ModelSchema,
}

impl<'a> DocumentCompiler<'a> {
    pub fn new(schema: &'a ModelSchema) -> Self {
        Self { schema }
    }

    /// Document path for a logical column.
    pub fn path(&self, column: &str) -> StorageResult<String> {
        self.property(column)?;
        Ok(document_path(column))
    }

    fn property(&self, column: &str) -> StorageResult<&'a Property> {
        self.schema
            .property(column)
            .ok_or_else(|| QueryError::UnknownColumn(column.to_string()).into())
    }

    /// Compiles a condition to a filter document; `{}` matches everything.
    pub fn compile_condition(&self, condition: &Condition) -> StorageResult<Map<String, Value>> {
        match condition {
            Condition::And(children) => {
                let mut compiled = Vec::with_capacity(children.len());
                for child in children {
                    let filter = self.compile_condition(child)?;
                    if !filter.is_empty() {
                        compiled.push(filter);
                    }
                }
                Ok(match compiled.len() {
                    0 => Map::new(),
                    1 => compiled.remove(0),
                    _ => flatten_conjunction(compiled),
                })
            }
            Condition::Or(children) => {
                if children.is_empty() {
                    return Ok(match_nothing());
                }
                let compiled = children
                    .iter()
                    .map(|child| self.compile_condition(child).map(Value::Object))
                    .collect::<StorageResult<Vec<_>>>()?;
                Ok(single("$or", Value::Array(compiled)))
            }
            Condition::Field { column, leaf } => self.compile_field(column, leaf),
        }
    }

    fn compile_field(&self, column: &str, leaf: &Leaf) -> StorageResult<Map<String, Value>> {
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
        let property = self.property(column)?;
        let path = document_path(column);

        // not(not x) matches x plus nulls, which needs an `$or` at this level
        if let Leaf::Op(Operator::Not(inner)) = leaf {
            if matches!(inner.as_ref(), Leaf::Op(Operator::Not(_))) {
                let negated = self.compile_field(column, inner)?;
                let nulls = single(&path, Value::Null);
                return Ok(single(
                    "$or",
                    json!([{"$nor": [Value::Object(negated)]}, Value::Object(nulls)]),
                ));
            }
        }

        let value = self.compile_leaf(property, leaf)?;
        Ok(single(&path, value))
    }

    /// The value placed under the column's path.
    fn compile_leaf(&self, property: &Property, leaf: &Leaf) -> StorageResult<Value> {
        Ok(match leaf {
            Leaf::Eq(Value::Null) => Value::Null,
            Leaf::Eq(Value::Array(values)) | Leaf::In(values) => {
                json!({"$in": self.convert_all(property, values)?})
            }
            Leaf::Eq(value) => self.condition_value(property, value)?,
            Leaf::Regex(regex) => regular_expression(&regex.pattern, regex.case_insensitive),
            Leaf::Op(op) => match op {
                Operator::Gt(v) => json!({"$gt": self.condition_value(property, v)?}),
                Operator::Lt(v) => json!({"$lt": self.condition_value(property, v)?}),
                Operator::Gte(v) => json!({"$gte": self.condition_value(property, v)?}),
                Operator::Lte(v) => json!({"$lte": self.condition_value(property, v)?}),
                Operator::In(values) => json!({"$in": self.convert_all(property, values)?}),
                Operator::Contains(Value::Array(needles)) => {
                    let patterns = needles
                        .iter()
                        .map(|needle| Ok(regular_expression(&escaped(needle)?, true)))
                        .collect::<StorageResult<Vec<_>>>()?;
                    json!({"$in": patterns})
                }
                Operator::Contains(needle) => regular_expression(&escaped(needle)?, true),
                Operator::StartsWith(prefix) => {
                    regular_expression(&format!("^{}", escaped(prefix)?), true)
                }
                Operator::EndsWith(suffix) => {
                    regular_expression(&format!("{}$", escaped(suffix)?), true)
                }
                Operator::Not(inner) => return self.compile_not(property, inner),
            },
        })
    }

    // `$ne`, `$nin` and `$not` all match documents where the field is null or
    // missing, mirroring the relational compilers.
    fn compile_not(&self, property: &Property, inner: &Leaf) -> StorageResult<Value> {
        Ok(match inner {
            Leaf::Eq(Value::Null) => json!({"$ne": null}),
            Leaf::Eq(Value::Array(values)) | Leaf::In(values) | Leaf::Op(Operator::In(values)) => {
                json!({"$nin": self.convert_all(property, values)?})
            }
            Leaf::Eq(value) => json!({"$ne": self.condition_value(property, value)?}),
            other => json!({"$not": self.compile_leaf(property, other)?}),
        })
    }

    fn convert_all(&self, property: &Property, values: &[Value]) -> StorageResult<Vec<Value>> {
        values
            .iter()
            .map(|value| self.condition_value(property, value))
            .collect()
    }

    /// Normalizes one operand and wraps it in its native type.
    fn condition_value(&self, property: &Property, value: &Value) -> StorageResult<Value> {
        let scalar;
        let property = if property.array && !value.is_array() {
            scalar = Property {
                array: false,
                ..property.clone()
            };
            &scalar
        } else {
            property
        };
        let normalized = property.normalize(value)?;
        Ok(to_native(property, normalized))
    }

    /// Converts a model record into a document for insertion.
    pub fn to_document(&self, record: &Record) -> StorageResult<Map<String, Value>> {
        let mut document = Map::new();
        for property in self.schema.properties() {
            let Some(value) = get_path(record, &property.name) else {
                continue;
            };
            let native = to_native(property, property.normalize(value)?);
            if property.primary_key {
                if !native.is_null() {
                    document.insert("_id".to_string(), native);
                }
                continue;
            }
            set_path(&mut document, &property.name, native);
        }
        Ok(document)
    }

    /// Converts a document read back in relaxed extended JSON into a model record.
    pub fn from_document(&self, mut document: Map<String, Value>) -> StorageResult<Record> {
        let mut record = Record::new();
        if let Some(id) = document.remove("_id") {
            record.insert("id".to_string(), from_native(&id));
        }
        for property in self.schema.properties() {
            if property.primary_key {
                continue;
            }
            let Some(value) = get_path(&document, &property.name) else {
                continue;
            };
            let value = match (&property.column_type, value) {
                (_, Value::Null) => Value::Null,
                (_, Value::Array(items)) if property.array => Value::Array(
                    items
                        .iter()
                        .map(|item| model_value(property, item))
                        .collect::<StorageResult<_>>()?,
                ),
                _ => model_value(property, value)?,
            };
            set_path(&mut record, &property.name, value);
        }
        Ok(record)
    }

    /// Builds `$set`/`$inc` update operators.
    pub fn update_document(&self, update: &UpdateSpec) -> StorageResult<Map<String, Value>> {
        let mut set = Map::new();
        let mut inc = Map::new();
        for op in update.ops() {
            let property = self.property(op.column())?;
            match op {
                UpdateOp::Set { column, value } => {
                    let native = to_native(property, property.normalize(value)?);
                    set.insert(document_path(column), native);
                }
                UpdateOp::Inc { column, amount } => {
                    inc.insert(document_path(column), amount.clone());
                }
            }
        }
        let mut document = Map::new();
        if !set.is_empty() {
            document.insert("$set".to_string(), Value::Object(set));
        }
        if !inc.is_empty() {
            document.insert("$inc".to_string(), Value::Object(inc));
        }
        Ok(document)
    }

    /// `$setOnInsert` values for an upsert: every column of `insert` the
    /// update does not already write, keyed by dotted path. The id is left to
    /// the server.
    pub fn insert_document(
        &self,
        insert: &Record,
        update: &UpdateSpec,
    ) -> StorageResult<Map<String, Value>> {
        let mut seed = Map::new();
        for property in self.schema.properties() {
            if property.primary_key
                || update.ops().iter().any(|op| op.column() == property.name)
            {
                continue;
            }
            let Some(value) = get_path(insert, &property.name) else {
                continue;
            };
            let native = to_native(property, property.normalize(value)?);
            seed.insert(document_path(&property.name), native);
        }
        Ok(seed)
    }

    /// Sort specification for a plain find.
    pub fn sort_document(&self, order: &[OrderBy]) -> StorageResult<Map<String, Value>> {
        let mut sort = Map::new();
        for key in order {
            sort.insert(self.path(&key.column)?, Value::from(key.direction.as_i32()));
        }
        Ok(sort)
    }

    /// Projection for a `select` list; `_id` is always returned.
    pub fn projection(&self, select: &[String]) -> StorageResult<Map<String, Value>> {
        let mut projection = Map::new();
        for column in select {
            projection.insert(self.path(column)?, Value::from(1));
        }
        Ok(projection)
    }

    /// Aggregation pipeline for a grouped query: `$match`, `$group`, `$sort`
    /// then `$skip`/`$limit`, each stage only when it has content.
    pub fn build_pipeline(&self, query: &Query, group: &GroupSpec) -> StorageResult<Vec<Value>> {
        let mut pipeline = Vec::new();

        let filter = self.compile_condition(&query.condition)?;
        if !filter.is_empty() {
            pipeline.push(json!({"$match": filter}));
        }

        let mut stage = Map::new();
        if group.by.is_empty() {
            stage.insert("_id".to_string(), Value::Null);
        } else {
            let mut keys = Map::new();
            for column in &group.by {
                keys.insert(
                    group_key(column),
                    Value::String(format!("${}", self.path(column)?)),
                );
            }
            stage.insert("_id".to_string(), Value::Object(keys));
        }
        for field in &group.fields {
            let expression = match &field.aggregate {
                Aggregate::Count => json!({"$sum": 1}),
                Aggregate::Sum(column) => json!({"$sum": format!("${}", self.path(column)?)}),
                Aggregate::Min(column) => json!({"$min": format!("${}", self.path(column)?)}),
                Aggregate::Max(column) => json!({"$max": format!("${}", self.path(column)?)}),
            };
            stage.insert(field.name.clone(), expression);
        }
        pipeline.push(json!({"$group": stage}));

        if !query.order.is_empty() {
            let mut sort = Map::new();
            for key in &query.order {
                let path = if group.by.contains(&key.column) {
                    format!("_id.{}", group_key(&key.column))
                } else if group.fields.iter().any(|f| f.name == key.column) {
                    key.column.clone()
                } else {
                    return Err(QueryError::UnknownColumn(key.column.clone()).into());
                };
                sort.insert(path, Value::from(key.direction.as_i32()));
            }
            pipeline.push(json!({"$sort": sort}));
        }
        if let Some(skip) = query.skip {
            pipeline.push(json!({"$skip": skip}));
        }
        if let Some(limit) = query.limit {
            pipeline.push(json!({"$limit": limit}));
        }
        Ok(pipeline)
    }

    /// Reshapes one `$group` output document into a flat record.
    pub fn from_group_document(
        &self,
        group: &GroupSpec,
        mut document: Map<String, Value>,
    ) -> StorageResult<Record> {
        let mut record = Record::new();
        let keys = document.remove("_id").unwrap_or(Value::Null);
        for column in &group.by {
            let property = self.property(column)?;
            let value = keys.get(group_key(column)).cloned().unwrap_or(Value::Null);
            let value = if value.is_null() {
                value
            } else {
                model_value(property, &value)?
            };
            record.insert(column.clone(), value);
        }
        for field in &group.fields {
            let value = document.remove(&field.name).unwrap_or(Value::Null);
            let value = match &field.aggregate {
                Aggregate::Count => value,
                Aggregate::Sum(_) => value.as_f64().map(Value::from).unwrap_or(value),
                Aggregate::Min(column) | Aggregate::Max(column) => {
                    let property = self.property(column)?;
                    if value.is_null() {
                        value
                    } else {
                        model_value(property, &value)?
                    }
                }
            };
            record.insert(field.name.clone(), value);
        }
        Ok(record)
    }
}

/// Model value to its extended JSON storage form.
pub fn native_value(property: &Property, value: &Value) -> StorageResult<Value> {
    Ok(to_native(property, property.normalize(value)?))
}

/// Stored extended JSON (canonical or relaxed) back to the model value.
pub fn stored_value(property: &Property, value: &Value) -> StorageResult<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Array(items) if property.array => items
            .iter()
            .map(|item| model_value(property, item))
            .collect::<StorageResult<Vec<_>>>()
            .map(Value::Array),
        _ => model_value(property, value),
    }
}

fn document_path(column: &str) -> String {
    if column == "id" {
        "_id".to_string()
    } else {
        column.to_string()
    }
}

fn group_key(column: &str) -> String {
    column.replace('.', "_")
}

fn single(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

fn match_nothing() -> Map<String, Value> {
    single("_id", json!({"$in": []}))
}

fn regular_expression(pattern: &str, case_insensitive: bool) -> Value {
    json!({"$regularExpression": {
        "pattern": pattern,
        "options": if case_insensitive { "i" } else { "" }
    }})
}

/// Needle text with regex metacharacters escaped.
fn escaped(needle: &Value) -> StorageResult<String> {
    match needle {
        Value::String(s) => Ok(regex::escape(s)),
        Value::Number(_) | Value::Bool(_) => Ok(regex::escape(&needle.to_string())),
        other => Err(QueryError::InvalidCondition(format!(
            "pattern operand must be a literal, got {}",
            other
        ))
        .into()),
    }
}

fn is_operator_document(value: &Value) -> bool {
    value.as_object().is_some_and(|map| {
        map.keys()
            .any(|k| k.starts_with('$') && !TYPE_WRAPPERS.contains(&k.as_str()))
    })
}

/// Merges single-key equality filters into one object when no key repeats;
/// anything else stays an explicit `$and`.
fn flatten_conjunction(filters: Vec<Map<String, Value>>) -> Map<String, Value> {
    let mergeable = filters.iter().all(|filter| {
        filter.len() == 1
            && filter
                .iter()
                .all(|(key, value)| !key.starts_with('$') && !is_operator_document(value))
    });
    if mergeable {
        let mut merged = Map::new();
        let mut collision = false;
        for filter in &filters {
            for (key, value) in filter {
                if merged.insert(key.clone(), value.clone()).is_some() {
                    collision = true;
                }
            }
        }
        if !collision {
            return merged;
        }
    }
    single(
        "$and",
        Value::Array(filters.into_iter().map(Value::Object).collect()),
    )
}

/// Wraps a normalized model value in its extended JSON form.
fn to_native(property: &Property, value: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Array(items) if property.array => Value::Array(
            items
                .into_iter()
                .map(|item| scalar_to_native(&property.column_type, item))
                .collect(),
        ),
        other => scalar_to_native(&property.column_type, other),
    }
}

fn scalar_to_native(column_type: &ColumnType, value: Value) -> Value {
    match column_type {
        ColumnType::Date => match parse_date(&value) {
            Some(dt) => json!({"$date": {"$numberLong": dt.timestamp_millis().to_string()}}),
            None => value,
        },
        ColumnType::RecordId => match &value {
            Value::String(s) if is_object_id(s) => json!({"$oid": s}),
            _ => value,
        },
        _ => value,
    }
}

fn is_object_id(s: &str) -> bool {
    s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Unwraps `$oid` identifiers; other values pass through.
fn from_native(value: &Value) -> Value {
    match value.get("$oid").and_then(Value::as_str) {
        Some(oid) => Value::String(oid.to_string()),
        None => value.clone(),
    }
}

fn model_value(property: &Property, value: &Value) -> StorageResult<Value> {
    match &property.column_type {
        ColumnType::Date => {
            // canonical `{"$date": {"$numberLong": ..}}` or relaxed `{"$date": "..."}`
            let raw = value.get("$date").unwrap_or(value);
            let raw = match raw.get("$numberLong").and_then(Value::as_str) {
                Some(millis) => millis.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
                None => raw.clone(),
            };
            parse_date(&raw)
                .map(|dt| format_date(&dt.with_timezone(&Utc)))
                .ok_or_else(|| {
                    StorageError::unexpected(format!(
                        "'{}' holds {}, expected date",
                        property.name, value
                    ))
                })
        }
        ColumnType::RecordId => Ok(from_native(value)),
        ColumnType::Number => Ok(value
            .as_f64()
            .map(Value::from)
            .unwrap_or_else(|| value.clone())),
        _ => Ok(value.clone()),
    }
}
