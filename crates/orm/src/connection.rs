//! Model-level entry points.
//!
//! A [`Connection`] pairs one [`Adapter`] with an explicit [`ModelRegistry`].
//! Every operation first makes sure the backend schema matches the declared
//! models, so application code never calls the synchronizer directly.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use serde_json::json;
//! use strata_orm::backends::sqlite::SqliteAdapter;
//! use strata_orm::condition::{Condition, Query};
//! use strata_orm::connection::Connection;
//! use strata_orm::schema::ModelSchema;
//! use strata_orm::types::Property;
//!
//! let connection = Connection::new(SqliteAdapter::in_memory()?);
//!
//! let mut user = ModelSchema::new("User");
//! user.add_column("name", Property::string().required())?;
//! user.add_column("age", Property::number())?;
//! connection.define_model(user)?;
//!
//! let bill = connection
//!     .create("User", json!({"name": "Bill", "age": 27}).as_object().cloned().unwrap_or_default())
//!     .await?;
//!
//! let adults = connection
//!     .find("User", &Query::filter(Condition::parse(&json!({"age": {"$gte": 18}}))?))
//!     .await?;
//! assert_eq!(adults[0]["id"], bill["id"]);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::association::{self, AssociationCache, Loaded};
use crate::condition::{Condition, Query, UpdateOp, UpdateSpec};
use crate::core::{Adapter, BackendCapability, RecordStream, Upserted, upsert_record};
use crate::error::{
    IntegrityError, QueryError, ResourceError, StorageError, StorageResult, ValidationError,
};
use crate::integrity::CascadeEngine;
use crate::schema::{CallbackEvent, IndexDescriptor, ModelRegistry, ModelSchema};
use crate::sync::{SyncReport, Synchronizer};
use crate::types::Record;
use crate::types::record::{get_path, record_id, set_path};

/// One backend session plus the models it manages.
pub struct Connection {
    registry: Arc<ModelRegistry>,
    adapter: Arc<dyn Adapter>,
    synchronizer: Synchronizer,
    cascade: CascadeEngine,
    associations: AssociationCache,
}

impl Connection {
    /// Creates a connection with an empty registry.
    pub fn new<A: Adapter + 'static>(adapter: A) -> Self {
        Self::with_registry(Arc::new(adapter), Arc::new(ModelRegistry::new()))
    }

    /// Creates a connection over a shared adapter and registry.
    pub fn with_registry(adapter: Arc<dyn Adapter>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            adapter,
            synchronizer: Synchronizer::new(),
            cascade: CascadeEngine::new(),
            associations: AssociationCache::new(),
        }
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Registers a model; its table is created on the next operation.
    pub fn define_model(&self, schema: ModelSchema) -> StorageResult<Arc<ModelSchema>> {
        self.registry.define(schema)
    }

    pub fn model(&self, name: &str) -> StorageResult<Arc<ModelSchema>> {
        self.registry.get(name)
    }

    /// Brings the backend schema up to date with the registry.
    ///
    /// Returns an empty report when nothing changed since the last pass.
    pub async fn sync(&self) -> StorageResult<SyncReport> {
        self.synchronizer
            .ensure(&self.registry, self.adapter.as_ref())
            .await
    }

    async fn ready(&self, model: &str) -> StorageResult<Arc<ModelSchema>> {
        self.sync().await?;
        self.registry.get(model)
    }

    /// Validates and inserts a record, returning it with its id.
    ///
    /// Defaults are applied to absent columns, required columns are checked,
    /// and values are normalized before the backend sees them.
    pub async fn create(&self, model: &str, mut record: Record) -> StorageResult<Record> {
        let schema = self.ready(model).await?;
        self.before_create(&schema, &mut record)?;
        if let Some(indexes) = self.unenforced_unique(&schema) {
            self.check_unique(&schema, &indexes, std::slice::from_ref(&record), &[])
                .await?;
        }

        let id = self.adapter.create(&schema, &record).await?;
        record.insert("id".to_string(), id);
        self.after_create(&schema, &mut record)?;
        Ok(record)
    }

    /// Inserts several records in one call.
    pub async fn create_bulk(&self, model: &str, records: Vec<Record>) -> StorageResult<Vec<Record>> {
        let schema = self.ready(model).await?;
        let mut records = records;
        for record in &mut records {
            self.before_create(&schema, record)?;
        }
        if let Some(indexes) = self.unenforced_unique(&schema) {
            self.check_unique(&schema, &indexes, &records, &[]).await?;
        }

        let ids = self.adapter.create_bulk(&schema, &records).await?;
        if ids.len() != records.len() {
            return Err(StorageError::unexpected(format!(
                "bulk insert of {} records returned {} ids",
                records.len(),
                ids.len()
            )));
        }
        for (record, id) in records.iter_mut().zip(ids) {
            record.insert("id".to_string(), id);
            self.after_create(&schema, record)?;
        }
        Ok(records)
    }

    pub async fn find(&self, model: &str, query: &Query) -> StorageResult<Vec<Record>> {
        let schema = self.ready(model).await?;
        self.adapter.find(&schema, query).await
    }

    /// The first record matching `condition`, if any.
    pub async fn find_one(&self, model: &str, condition: Condition) -> StorageResult<Option<Record>> {
        let schema = self.ready(model).await?;
        let mut found = self
            .adapter
            .find(&schema, &Query::filter(condition).limit(1))
            .await?;
        Ok(if found.is_empty() {
            None
        } else {
            Some(found.swap_remove(0))
        })
    }

    /// Fails with `not found` when no record has that id.
    pub async fn find_by_id(&self, model: &str, id: &Value) -> StorageResult<Record> {
        let schema = self.ready(model).await?;
        self.adapter.find_by_id(&schema, id).await
    }

    /// Streams the records of a query through the backend's cursor.
    pub async fn stream(&self, model: &str, query: Query) -> StorageResult<RecordStream> {
        let schema = self.ready(model).await?;
        self.adapter.stream(schema, query).await
    }

    pub async fn count(&self, model: &str, condition: &Condition) -> StorageResult<u64> {
        let schema = self.ready(model).await?;
        self.adapter.count(&schema, condition).await
    }

    /// Replaces a stored record; columns absent from `record` become null.
    pub async fn update(&self, model: &str, mut record: Record) -> StorageResult<Record> {
        let schema = self.ready(model).await?;
        let id = record_id(&record).cloned().ok_or(ResourceError::NotFound)?;
        schema.run_callbacks(CallbackEvent::BeforeSave, &mut record)?;
        prepare(&schema, &mut record, false)?;
        if let Some(indexes) = self.unenforced_unique(&schema) {
            let stored = self.adapter.find_by_id(&schema, &id).await?;
            self.check_unique(
                &schema,
                &indexes,
                std::slice::from_ref(&record),
                std::slice::from_ref(&stored),
            )
            .await?;
        }

        self.adapter.update(&schema, &record).await?;
        // the foreign keys may have moved, so parents' lists are stale too
        self.associations.clear();
        schema.run_callbacks(CallbackEvent::AfterSave, &mut record)?;
        Ok(record)
    }

    /// Applies a partial update to every matching record.
    pub async fn update_where(
        &self,
        model: &str,
        update: &UpdateSpec,
        condition: &Condition,
    ) -> StorageResult<u64> {
        let schema = self.ready(model).await?;
        let update = update.resolve(&schema)?;
        self.check_unique_update(&schema, &update, condition).await?;
        let updated = self
            .adapter
            .update_partial(&schema, &update, condition)
            .await?;
        self.associations.clear();
        Ok(updated)
    }

    /// Updates the matching records or creates one from the condition's
    /// equality fields and the update.
    ///
    /// A created record goes through the same defaults, validation, unique
    /// checks and callbacks as [`create`](Self::create).
    pub async fn upsert(
        &self,
        model: &str,
        update: &UpdateSpec,
        condition: &Condition,
    ) -> StorageResult<Upserted> {
        let schema = self.ready(model).await?;
        let update = update.resolve(&schema)?;
        self.check_unique_update(&schema, &update, condition).await?;
        let updated = self
            .adapter
            .update_partial(&schema, &update, condition)
            .await?;
        if updated > 0 {
            self.associations.clear();
            return Ok(Upserted::Updated(updated));
        }

        let mut insert = upsert_record(condition, &update);
        self.before_create(&schema, &mut insert)?;
        if let Some(indexes) = self.unenforced_unique(&schema) {
            self.check_unique(&schema, &indexes, std::slice::from_ref(&insert), &[])
                .await?;
        }
        let upserted = self
            .adapter
            .upsert(&schema, &update, condition, &insert)
            .await?;
        if let Upserted::Created(id) = &upserted {
            insert.insert("id".to_string(), id.clone());
            self.after_create(&schema, &mut insert)?;
        }
        self.associations.clear();
        Ok(upserted)
    }

    /// Deletes the matching records after applying archival and integrity
    /// rules, returning how many were removed.
    pub async fn delete(&self, model: &str, condition: &Condition) -> StorageResult<u64> {
        let schema = self.ready(model).await?;
        let removed = self
            .cascade
            .delete(&self.registry, self.adapter.as_ref(), &schema, condition)
            .await?;
        // cascades may have touched other models
        self.associations.clear();
        Ok(removed)
    }

    /// Returns whether a record was removed.
    pub async fn delete_by_id(&self, model: &str, id: &Value) -> StorageResult<bool> {
        Ok(self.delete(model, &Condition::id(id.clone())).await? > 0)
    }

    /// Drops the model's table. It is recreated, empty, on the next operation.
    pub async fn drop_model(&self, model: &str) -> StorageResult<()> {
        let schema = self.registry.get(model)?;
        self.adapter.drop_table(&schema).await?;
        self.associations.forget_model(model);
        self.synchronizer.invalidate().await;
        tracing::debug!(model, table = schema.table_name(), "Dropped model table");
        Ok(())
    }

    /// Drops every model's table, referencing models first.
    pub async fn drop_all_models(&self) -> StorageResult<()> {
        for schema in self.registry.drop_order() {
            self.adapter.drop_table(&schema).await?;
        }
        self.associations.clear();
        self.synchronizer.invalidate().await;
        Ok(())
    }

    /// Loads an association of `record`, caching the result.
    pub async fn load(&self, model: &str, record: &Record, name: &str) -> StorageResult<Loaded> {
        let schema = self.ready(model).await?;
        let association = schema
            .association(name)
            .ok_or_else(|| QueryError::UnknownColumn(name.to_string()))?;
        let id = record_id(record)
            .cloned()
            .ok_or_else(|| ValidationError::Required("id".to_string()))?;
        if let Some(loaded) = self.associations.get(model, &id, name) {
            return Ok(loaded);
        }

        let loaded =
            association::fetch(&self.registry, self.adapter.as_ref(), association, record, &id)
                .await?;
        self.associations.put(model, &id, name, loaded.clone());
        Ok(loaded)
    }

    /// The cached association of `record`, without touching the backend.
    pub fn cached_value(&self, model: &str, record: &Record, name: &str) -> Option<Loaded> {
        let id = record_id(record)?;
        self.associations.get(model, id, name)
    }

    /// Drops the cached associations of `record`.
    pub fn forget(&self, model: &str, record: &Record) {
        if let Some(id) = record_id(record) {
            self.associations.forget(model, id);
        }
    }

    fn before_create(&self, schema: &ModelSchema, record: &mut Record) -> StorageResult<()> {
        schema.run_callbacks(CallbackEvent::BeforeSave, record)?;
        schema.run_callbacks(CallbackEvent::BeforeCreate, record)?;
        prepare(schema, record, true)
    }

    fn after_create(&self, schema: &ModelSchema, record: &mut Record) -> StorageResult<()> {
        schema.run_callbacks(CallbackEvent::AfterCreate, record)?;
        schema.run_callbacks(CallbackEvent::AfterSave, record)
    }

    /// Unique indexes on `schema` the backend is not enforcing, when this
    /// connection can check them itself.
    fn unenforced_unique(&self, schema: &ModelSchema) -> Option<Vec<IndexDescriptor>> {
        let indexes = self.synchronizer.unenforced_unique(schema.table_name());
        if indexes.is_empty() {
            return None;
        }
        if !self.adapter.supports(BackendCapability::Query) {
            tracing::warn!(
                backend = self.adapter.name(),
                table = schema.table_name(),
                "cannot check unenforced unique indexes without query support"
            );
            return None;
        }
        Some(indexes)
    }

    /// Checks `records` against unenforced unique indexes, both among
    /// themselves and against what is stored.
    ///
    /// For replacements `previous` holds the stored version of each record:
    /// records are then skipped when their indexed values did not change,
    /// and matches on the records being replaced do not count.
    async fn check_unique(
        &self,
        schema: &ModelSchema,
        indexes: &[IndexDescriptor],
        records: &[Record],
        previous: &[Record],
    ) -> StorageResult<()> {
        let replaced: Vec<&Value> = previous.iter().filter_map(record_id).collect();
        for index in indexes {
            let mut seen = HashSet::new();
            for (position, record) in records.iter().enumerate() {
                let Some(condition) = unique_condition(index, record) else {
                    continue;
                };
                let before = previous
                    .get(position)
                    .and_then(|stored| unique_condition(index, stored));
                if before.as_ref() == Some(&condition) {
                    continue;
                }
                if !seen.insert(condition.to_value().to_string()) {
                    return Err(duplicated(index));
                }

                let taken = if replaced.is_empty() {
                    self.adapter.count(schema, &condition).await? > 0
                } else {
                    self.adapter
                        .find(schema, &Query::filter(condition).select("id"))
                        .await?
                        .iter()
                        .filter_map(record_id)
                        .any(|id| !replaced.contains(&id))
                };
                if taken {
                    return Err(duplicated(index));
                }
            }
        }
        Ok(())
    }

    /// Checks what a partial update would write to unenforced unique
    /// indexes whose columns it touches.
    async fn check_unique_update(
        &self,
        schema: &ModelSchema,
        update: &UpdateSpec,
        condition: &Condition,
    ) -> StorageResult<()> {
        let Some(indexes) = self.unenforced_unique(schema) else {
            return Ok(());
        };
        let touched: Vec<IndexDescriptor> = indexes
            .into_iter()
            .filter(|index| {
                index
                    .columns
                    .iter()
                    .any(|(column, _)| update.ops().iter().any(|op| op.column() == column))
            })
            .collect();
        if touched.is_empty() {
            return Ok(());
        }

        let matched = self
            .adapter
            .find(schema, &Query::filter(condition.clone()))
            .await?;
        let updated: Vec<Record> = matched
            .iter()
            .map(|stored| apply_update(stored, update))
            .collect();
        self.check_unique(schema, &touched, &updated, &matched).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("backend", &self.adapter.name())
            .field("models", &self.registry.models().len())
            .finish_non_exhaustive()
    }
}

/// Applies defaults, checks required columns and normalizes values.
///
/// Every failure is collected and reported as one error.
fn prepare(schema: &ModelSchema, record: &mut Record, apply_defaults: bool) -> StorageResult<()> {
    let mut errors = Vec::new();
    for property in schema.properties() {
        if property.primary_key {
            continue;
        }
        let current = get_path(record, &property.name)
            .filter(|value| !value.is_null())
            .cloned();
        let value = match (current, &property.default) {
            (Some(value), _) => value,
            (None, Some(default)) if apply_defaults => default.resolve(),
            (None, _) => {
                if property.required {
                    errors.push(ValidationError::Required(property.name.clone()));
                }
                continue;
            }
        };
        match property.normalize(&value) {
            Ok(value) => set_path(record, &property.name, value),
            Err(err) => errors.push(err),
        }
    }
    match ValidationError::from_list(errors) {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Equality over the index columns, or `None` when a column is null.
fn unique_condition(index: &IndexDescriptor, record: &Record) -> Option<Condition> {
    let mut parts = Vec::with_capacity(index.columns.len());
    for (column, _) in &index.columns {
        let value = get_path(record, column).filter(|value| !value.is_null())?;
        parts.push(Condition::eq(column.clone(), value.clone()));
    }
    Some(if parts.len() == 1 {
        parts.swap_remove(0)
    } else {
        Condition::and(parts)
    })
}

/// `stored` as it will read after `update`.
fn apply_update(stored: &Record, update: &UpdateSpec) -> Record {
    let mut record = stored.clone();
    for op in update.ops() {
        let value = match op {
            UpdateOp::Set { value, .. } => value.clone(),
            UpdateOp::Inc { column, amount } => increment(get_path(&record, column), amount),
        };
        set_path(&mut record, op.column(), value);
    }
    record
}

fn increment(current: Option<&Value>, amount: &Value) -> Value {
    match (current.and_then(Value::as_i64), amount.as_i64()) {
        (Some(current), Some(amount)) => Value::from(current + amount),
        _ => {
            let current = current.and_then(Value::as_f64).unwrap_or(0.0);
            Value::from(current + amount.as_f64().unwrap_or(0.0))
        }
    }
}

fn duplicated(index: &IndexDescriptor) -> StorageError {
    let column = match index.columns.as_slice() {
        [(column, _)] => Some(column.clone()),
        _ => None,
    };
    IntegrityError::Duplicated { column }.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::kv::KvAdapter;
    use crate::schema::{BelongsToOptions, Callback};
    use crate::types::Property;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn user() -> ModelSchema {
        let mut user = ModelSchema::new("User");
        user.add_column("name", Property::string().required()).unwrap();
        user.add_column("age", Property::integer()).unwrap();
        user.add_column("role", Property::string().default_value(json!("member")))
            .unwrap();
        user
    }

    #[test]
    fn test_prepare_applies_defaults_and_normalizes() {
        let schema = user();
        let mut bill = record(json!({"name": "Bill", "age": "27"}));
        prepare(&schema, &mut bill, true).unwrap();
        assert_eq!(bill["age"], json!(27));
        assert_eq!(bill["role"], json!("member"));

        let mut replaced = record(json!({"id": 1, "name": "Bill"}));
        prepare(&schema, &mut replaced, false).unwrap();
        assert!(replaced.get("role").is_none());
    }

    #[test]
    fn test_prepare_joins_failures() {
        let schema = user();
        let mut invalid = record(json!({"age": "old"}));
        let err = prepare(&schema, &mut invalid, true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "'name' is required,'age' is not a valid integer"
        );
    }

    #[test]
    fn test_unique_condition_skips_nulls() {
        let index = IndexDescriptor::on("age").unique();
        assert!(unique_condition(&index, &record(json!({"age": null}))).is_none());
        assert_eq!(
            unique_condition(&index, &record(json!({"age": 27}))),
            Some(Condition::eq("age", json!(27)))
        );
        assert_eq!(duplicated(&index).to_string(), "duplicated age");
    }

    #[test]
    fn test_apply_update_sets_and_increments() {
        let stored = record(json!({"id": 1, "age": 27, "score": 1.5, "address": {"city": "Oslo"}}));
        let update = UpdateSpec::new()
            .set("address.city", json!("Paris"))
            .inc("age", 1)
            .inc("score", 1)
            .inc("visits", 2);
        let updated = apply_update(&stored, &update);
        assert_eq!(updated["age"], json!(28));
        assert_eq!(updated["score"].as_f64(), Some(2.5));
        assert_eq!(updated["visits"].as_f64(), Some(2.0));
        assert_eq!(updated["address"]["city"], json!("Paris"));
        assert_eq!(stored["age"], json!(27));
    }

    #[tokio::test]
    async fn test_create_runs_callbacks_in_order() {
        let connection = Connection::new(KvAdapter::in_memory());
        let mut schema = user();
        schema.define_method("stamp", |record: &mut Record| {
            record.insert("name".to_string(), json!("stamped"));
            Ok(())
        });
        schema.on(CallbackEvent::BeforeCreate, Callback::method("stamp"));
        schema.on(
            CallbackEvent::AfterCreate,
            Callback::invoke(|record: &mut Record| {
                assert!(record.contains_key("id"));
                Ok(())
            }),
        );
        connection.define_model(schema).unwrap();

        let created = connection
            .create("User", record(json!({"name": "Bill"})))
            .await
            .unwrap();
        assert_eq!(created["name"], json!("stamped"));
        let stored = connection.find_by_id("User", &created["id"]).await.unwrap();
        assert_eq!(stored["name"], json!("stamped"));
        assert_eq!(stored["role"], json!("member"));
    }

    #[tokio::test]
    async fn test_belongs_to_is_cached() {
        let connection = Connection::new(KvAdapter::in_memory());
        connection.define_model(user()).unwrap();
        connection.define_model(ModelSchema::new("Post")).unwrap();
        connection
            .registry()
            .belongs_to("Post", "User", BelongsToOptions::default())
            .unwrap();

        let bill = connection
            .create("User", record(json!({"name": "Bill"})))
            .await
            .unwrap();
        let post = connection
            .create("Post", record(json!({"user_id": bill["id"].clone()})))
            .await
            .unwrap();

        assert!(connection.cached_value("Post", &post, "user").is_none());
        let Loaded::One(Some(owner)) = connection.load("Post", &post, "user").await.unwrap() else {
            panic!("expected the owning user");
        };
        assert_eq!(owner["name"], json!("Bill"));
        assert!(connection.cached_value("Post", &post, "user").is_some());

        connection.forget("Post", &post);
        assert!(connection.cached_value("Post", &post, "user").is_none());
    }

    #[tokio::test]
    async fn test_update_drops_cached_associations() {
        let connection = Connection::new(KvAdapter::in_memory());
        connection.define_model(user()).unwrap();
        connection.define_model(ModelSchema::new("Post")).unwrap();
        connection
            .registry()
            .belongs_to("Post", "User", BelongsToOptions::default())
            .unwrap();

        let bill = connection
            .create("User", record(json!({"name": "Bill"})))
            .await
            .unwrap();
        let gina = connection
            .create("User", record(json!({"name": "Gina"})))
            .await
            .unwrap();
        let post = connection
            .create("Post", record(json!({"user_id": bill["id"].clone()})))
            .await
            .unwrap();
        connection.load("Post", &post, "user").await.unwrap();

        let mut moved = post.clone();
        moved.insert("user_id".to_string(), gina["id"].clone());
        connection.update("Post", moved.clone()).await.unwrap();
        assert!(connection.cached_value("Post", &post, "user").is_none());

        let owner = connection.load("Post", &moved, "user").await.unwrap();
        assert_eq!(owner.to_value()["name"], json!("Gina"));
    }
}
