//! The adapter contract every storage engine implements.

use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::condition::{Condition, Query, UpdateOp, UpdateSpec};
use crate::error::StorageResult;
use crate::schema::{IndexDescriptor, IntegrityAction, ModelSchema, SchemaSnapshot};
use crate::types::record::set_path;
use crate::types::{Property, Record};

use super::{BackendCapability, BackendKind};

/// A cursor-backed stream of records.
///
/// Backpressure is whatever the driver's transport provides.
pub type RecordStream = Pin<Box<dyn Stream<Item = StorageResult<Record>> + Send>>;

/// Outcome of an upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum Upserted {
    /// Existing records matched; carries how many were changed.
    Updated(u64),
    /// Nothing matched; carries the id of the record created instead.
    Created(Value),
}

/// A storage engine behind the common contract.
///
/// Adapters receive a [`ModelSchema`] with every call so they can resolve
/// logical columns to storage names and marshal values; they keep no model
/// state of their own. Conditions arrive uncompiled and are compiled with the
/// strategy of the adapter's family: parameterized SQL for relational
/// engines, filter documents for document stores, key lookups for key-value
/// stores.
///
/// # Errors
///
/// Driver failures are mapped onto the crate's error taxonomy:
///
/// * `StorageError::Resource(TableDoesNotExist)` - the table is missing
/// * `StorageError::Integrity(Duplicated)` - unique constraint violation
/// * `StorageError::Integrity(Rejected)` - foreign key violation
/// * `StorageError::Validation(Required)` - NOT NULL violation
/// * `StorageError::Backend(UnsupportedCapability)` - the engine cannot
///   evaluate the request
/// * `StorageError::Backend(Unknown)` - anything else, with the driver error
///   kept as source
///
/// # Example
///
/// ```ignore
/// use strata_orm::core::{Adapter, BackendCapability};
///
/// if adapter.supports(BackendCapability::RegexMatch) {
///     let rows = adapter.find(&schema, &query).await?;
/// }
/// ```
#[async_trait]
pub trait Adapter: Send + Sync + Debug {
    /// Returns the kind of backend.
    fn kind(&self) -> BackendKind;

    /// Returns a human-readable name for this backend.
    fn name(&self) -> &'static str;

    /// Checks if this backend supports the given capability.
    fn supports(&self, capability: BackendCapability) -> bool;

    /// Introspects tables, columns, indexes and foreign keys.
    async fn get_schemas(&self) -> StorageResult<SchemaSnapshot>;

    /// Creates the table with every declared column and the primary key.
    async fn create_table(&self, schema: &ModelSchema) -> StorageResult<()>;

    /// Adds one declared column to an existing table.
    async fn add_column(&self, schema: &ModelSchema, column: &str) -> StorageResult<()>;

    /// Creates an index under its resolved name.
    async fn create_index(
        &self,
        schema: &ModelSchema,
        name: &str,
        index: &IndexDescriptor,
    ) -> StorageResult<()>;

    /// Adds a native foreign key from `schema.column` to `parent.id`.
    ///
    /// Only called when the adapter reports
    /// [`BackendCapability::NativeIntegrity`].
    async fn create_foreign_key(
        &self,
        schema: &ModelSchema,
        column: &str,
        parent: &ModelSchema,
        action: IntegrityAction,
    ) -> StorageResult<()>;

    /// Drops the table and everything in it.
    async fn drop_table(&self, schema: &ModelSchema) -> StorageResult<()>;

    /// Inserts a record and returns its id.
    async fn create(&self, schema: &ModelSchema, record: &Record) -> StorageResult<Value>;

    /// Inserts several records, returning their ids in order.
    async fn create_bulk(
        &self,
        schema: &ModelSchema,
        records: &[Record],
    ) -> StorageResult<Vec<Value>> {
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(self.create(schema, record).await?);
        }
        Ok(ids)
    }

    /// Replaces the record with the same id.
    ///
    /// Fails with `not found` when no record has that id.
    async fn update(&self, schema: &ModelSchema, record: &Record) -> StorageResult<()>;

    /// Applies `update` to every record matching `condition`, returning how
    /// many matched.
    async fn update_partial(
        &self,
        schema: &ModelSchema,
        update: &UpdateSpec,
        condition: &Condition,
    ) -> StorageResult<u64>;

    /// Updates the records matching `condition`, or creates `insert` when
    /// none match.
    ///
    /// `insert` is already validated and carries defaults; [`upsert_record`]
    /// builds its starting point. The default is [`upsert_fallback`]; engines
    /// with a native upsert override it.
    async fn upsert(
        &self,
        schema: &ModelSchema,
        update: &UpdateSpec,
        condition: &Condition,
        insert: &Record,
    ) -> StorageResult<Upserted> {
        upsert_fallback(self, schema, update, condition, insert).await
    }

    /// Fails with `not found` when no record has that id.
    async fn find_by_id(&self, schema: &ModelSchema, id: &Value) -> StorageResult<Record>;

    async fn find(&self, schema: &ModelSchema, query: &Query) -> StorageResult<Vec<Record>>;

    /// Streams the records of a query. The stream owns everything it needs.
    async fn stream(&self, schema: Arc<ModelSchema>, query: Query) -> StorageResult<RecordStream>;

    async fn count(&self, schema: &ModelSchema, condition: &Condition) -> StorageResult<u64>;

    /// Deletes every record matching `condition`, returning how many were removed.
    ///
    /// This is the raw delete; integrity rules not enforced natively are
    /// applied by the cascade engine before it is called.
    async fn delete(&self, schema: &ModelSchema, condition: &Condition) -> StorageResult<u64>;
}

/// Marshals model values to and from a backend's wire representation.
pub trait ValueCodec {
    /// What the driver binds and returns.
    type Wire;

    fn value_to_db(&self, property: &Property, value: &Value) -> StorageResult<Self::Wire>;

    fn value_to_model(&self, property: &Property, wire: Self::Wire) -> StorageResult<Value>;
}

/// The record an upsert creates when nothing matches: the equality fields
/// of `condition` merged with the update's `set` values. `$inc` columns start
/// from their increment.
pub fn upsert_record(condition: &Condition, update: &UpdateSpec) -> Record {
    let mut record = condition.equality_fields();
    for op in update.ops() {
        match op {
            UpdateOp::Set { column, value } => set_path(&mut record, column, value.clone()),
            UpdateOp::Inc { column, amount } => set_path(&mut record, column, amount.clone()),
        }
    }
    record
}

/// Shared upsert: update, else create, else update once more.
///
/// When the update matches nothing, `insert` is created. If that create
/// loses a race and fails as a duplicate, the update is retried once.
///
/// Not atomic: a concurrent writer can insert between the zero-row update
/// and the create.
pub async fn upsert_fallback<A>(
    adapter: &A,
    schema: &ModelSchema,
    update: &UpdateSpec,
    condition: &Condition,
    insert: &Record,
) -> StorageResult<Upserted>
where
    A: Adapter + ?Sized,
{
    let updated = adapter.update_partial(schema, update, condition).await?;
    if updated > 0 {
        return Ok(Upserted::Updated(updated));
    }

    match adapter.create(schema, insert).await {
        Ok(id) => Ok(Upserted::Created(id)),
        Err(err) if err.is_duplicated() => {
            tracing::warn!(
                backend = adapter.name(),
                model = schema.name(),
                "upsert create collided with a concurrent insert, retrying update"
            );
            let updated = adapter.update_partial(schema, update, condition).await?;
            Ok(Upserted::Updated(updated))
        }
        Err(err) => Err(err),
    }
}
