//! Memoized association loading.
//!
//! Loaded counterparts are kept in an explicit table keyed by
//! `(model, record id, association)`. [`Connection::load`] fills it and
//! [`Connection::cached_value`] reads it without touching the backend.
//!
//! [`Connection::load`]: crate::connection::Connection::load
//! [`Connection::cached_value`]: crate::connection::Connection::cached_value

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

use crate::condition::{Condition, Query};
use crate::core::Adapter;
use crate::error::StorageResult;
use crate::schema::{Association, AssociationKind, ModelRegistry};
use crate::types::Record;
use crate::types::record::get_path;

/// The counterpart(s) of one association.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    /// `belongs_to` and `has_one`; `None` when nothing is linked.
    One(Option<Record>),
    /// `has_many`.
    Many(Vec<Record>),
}

impl Loaded {
    /// The loaded value as JSON: an object, `null`, or an array.
    pub fn to_value(&self) -> Value {
        match self {
            Loaded::One(Some(record)) => Value::Object(record.clone()),
            Loaded::One(None) => Value::Null,
            Loaded::Many(records) => {
                Value::Array(records.iter().cloned().map(Value::Object).collect())
            }
        }
    }
}

type CacheKey = (String, String, String);

/// Per-connection association cache.
#[derive(Debug, Default)]
pub struct AssociationCache {
    entries: RwLock<HashMap<CacheKey, Loaded>>,
}

impl AssociationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, model: &str, id: &Value, name: &str) -> Option<Loaded> {
        self.entries.read().get(&key(model, id, name)).cloned()
    }

    pub fn put(&self, model: &str, id: &Value, name: &str, loaded: Loaded) {
        self.entries.write().insert(key(model, id, name), loaded);
    }

    /// Drops every cached association of one record.
    pub fn forget(&self, model: &str, id: &Value) {
        let id = id_key(id);
        self.entries
            .write()
            .retain(|(m, i, _), _| !(m == model && *i == id));
    }

    /// Drops every cached association of a model.
    pub fn forget_model(&self, model: &str) {
        self.entries.write().retain(|(m, _, _), _| m != model);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn key(model: &str, id: &Value, name: &str) -> CacheKey {
    (model.to_string(), id_key(id), name.to_string())
}

/// Reads the counterpart(s) of `association` for `record` from the backend.
pub(crate) async fn fetch(
    registry: &ModelRegistry,
    adapter: &dyn Adapter,
    association: &Association,
    record: &Record,
    id: &Value,
) -> StorageResult<Loaded> {
    let counterpart = registry.get(&association.counterpart)?;
    match association.kind {
        AssociationKind::BelongsTo => {
            let Some(reference) = get_path(record, &association.foreign_key)
                .filter(|value| !value.is_null())
            else {
                return Ok(Loaded::One(None));
            };
            match adapter.find_by_id(&counterpart, reference).await {
                Ok(found) => Ok(Loaded::One(Some(found))),
                Err(err) if err.is_not_found() => Ok(Loaded::One(None)),
                Err(err) => Err(err),
            }
        }
        AssociationKind::HasOne => {
            let query =
                Query::filter(Condition::eq(association.foreign_key.clone(), id.clone())).limit(1);
            let mut found = adapter.find(&counterpart, &query).await?;
            Ok(Loaded::One(if found.is_empty() {
                None
            } else {
                Some(found.swap_remove(0))
            }))
        }
        AssociationKind::HasMany => {
            let query = Query::filter(Condition::eq(association.foreign_key.clone(), id.clone()));
            Ok(Loaded::Many(adapter.find(&counterpart, &query).await?))
        }
    }
}
