//! Identifier lookups for key-value stores.
//!
//! Key-value stores have no query engine. The only conditions they can
//! answer are equality or membership on `id`, by direct key lookup, and the
//! empty condition, by a prefix scan. Anything else is reported as a
//! capability error instead of being silently dropped.

use serde_json::Value;

use crate::condition::{Condition, Leaf, Operator};
use crate::error::{StorageError, StorageResult};

/// How a key-value adapter locates the records a condition targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLookup {
    /// Every record of the table.
    All,
    /// Exactly these identifiers, in order, without duplicates.
    Ids(Vec<String>),
}

/// Compiles a condition into a key lookup.
///
/// Conjunctions of several `id` tests intersect; disjunctions union.
pub fn compile_key_lookup(backend: &str, condition: &Condition) -> StorageResult<KeyLookup> {
    match condition {
        Condition::And(children) => {
            let mut lookup = KeyLookup::All;
            for child in children {
                lookup = match (lookup, compile_key_lookup(backend, child)?) {
                    (KeyLookup::All, other) | (other, KeyLookup::All) => other,
                    (KeyLookup::Ids(left), KeyLookup::Ids(right)) => {
                        KeyLookup::Ids(left.into_iter().filter(|id| right.contains(id)).collect())
                    }
                };
            }
            Ok(lookup)
        }
        Condition::Or(children) => {
            let mut ids: Vec<String> = Vec::new();
            for child in children {
                match compile_key_lookup(backend, child)? {
                    KeyLookup::All => return Ok(KeyLookup::All),
                    KeyLookup::Ids(found) => {
                        for id in found {
                            if !ids.contains(&id) {
                                ids.push(id);
                            }
                        }
                    }
                }
            }
            Ok(KeyLookup::Ids(ids))
        }
        Condition::Field { column, leaf } if column == "id" => match leaf {
            Leaf::Eq(Value::Array(values))
            | Leaf::In(values)
            | Leaf::Op(Operator::In(values)) => {
                let mut ids = Vec::with_capacity(values.len());
                for value in values {
                    let id = key_of(backend, value)?;
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                Ok(KeyLookup::Ids(ids))
            }
            Leaf::Eq(value) => Ok(KeyLookup::Ids(vec![key_of(backend, value)?])),
            _ => Err(StorageError::unsupported(
                backend,
                "conditions other than equality or membership on id",
            )),
        },
        Condition::Field { column, .. } => Err(StorageError::unsupported(
            backend,
            format!("condition on column '{}'", column),
        )),
    }
}

/// The key segment for an identifier value.
pub fn key_of(backend: &str, value: &Value) -> StorageResult<String> {
    match value {
        Value::String(s) if !s.is_empty() && !s.contains('/') => Ok(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        other => Err(StorageError::unsupported(
            backend,
            format!("identifier {}", other),
        )),
    }
}
