//! Key-value adapter implementation.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::compiler::{KeyLookup, compile_key_lookup, key_of};
use crate::condition::{Condition, Query, UpdateOp, UpdateSpec};
use crate::core::{Adapter, AdapterSettings, BackendCapability, BackendKind, RecordStream};
use crate::error::{IntegrityError, ResourceError, StorageError, StorageResult};
use crate::schema::{IndexDescriptor, IntegrityAction, ModelSchema, SchemaSnapshot, TableSnapshot};
use crate::types::Record;
use crate::types::record::{get_path, set_path};

use super::{KeyValueStore, MemoryStore};

const BACKEND_NAME: &str = "key-value";

/// Configuration for the key-value adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KvConfig {
    /// Prefix put in front of every key, so several databases can share a store.
    #[serde(default)]
    pub prefix: Option<String>,
}

impl KvConfig {
    /// Reads `STRATA_KV_PREFIX`.
    pub fn from_env() -> Self {
        Self {
            prefix: std::env::var("STRATA_KV_PREFIX").ok(),
        }
    }
}

impl From<&AdapterSettings> for KvConfig {
    fn from(settings: &AdapterSettings) -> Self {
        Self {
            prefix: Some(settings.database.clone()).filter(|db| !db.is_empty()),
        }
    }
}

/// Key layout.
///
/// ```text
/// <prefix>/data/<table>/<id>       one record
/// <prefix>/_ids/<table>            id counter
/// <prefix>/_tables/<table>         table marker
/// <prefix>/_indexes/<table>/<name> declared index
/// ```
#[derive(Debug, Clone)]
pub struct KvKeyspace {
    base_prefix: Option<String>,
}

impl KvKeyspace {
    pub fn new(base_prefix: Option<String>) -> Self {
        let base_prefix = base_prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Self { base_prefix }
    }

    pub fn record_key(&self, table: &str, id: &str) -> String {
        self.join(&["data", table, id])
    }

    pub fn records_prefix(&self, table: &str) -> String {
        self.join(&["data", table, ""])
    }

    pub fn counter_key(&self, table: &str) -> String {
        self.join(&["_ids", table])
    }

    pub fn table_key(&self, table: &str) -> String {
        self.join(&["_tables", table])
    }

    pub fn tables_prefix(&self) -> String {
        self.join(&["_tables", ""])
    }

    pub fn index_key(&self, table: &str, name: &str) -> String {
        self.join(&["_indexes", table, name])
    }

    pub fn indexes_prefix(&self, table: &str) -> String {
        self.join(&["_indexes", table, ""])
    }

    /// The last segment of a key.
    pub fn leaf<'k>(&self, key: &'k str) -> &'k str {
        key.rsplit('/').next().unwrap_or(key)
    }

    fn join(&self, parts: &[&str]) -> String {
        let path = parts.join("/");
        match &self.base_prefix {
            Some(base) => format!("{}/{}", base, path),
            None => path,
        }
    }
}

/// Adapter over any [`KeyValueStore`].
///
/// Records are addressed by id only: conditions must be equality or
/// membership on `id`, and queries honor `select`, `limit` and `skip`.
/// Ordering and grouping are capability errors.
pub struct KvAdapter {
    store: Arc<dyn KeyValueStore>,
    keyspace: KvKeyspace,
    config: KvConfig,
}

impl Debug for KvAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvAdapter")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}

impl KvAdapter {
    /// Adapter on a fresh process-local store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), KvConfig::default())
    }

    pub fn new(store: Arc<dyn KeyValueStore>, config: KvConfig) -> Self {
        Self {
            store,
            keyspace: KvKeyspace::new(config.prefix.clone()),
            config,
        }
    }

    pub fn config(&self) -> &KvConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    async fn ensure_table(&self, schema: &ModelSchema) -> StorageResult<()> {
        let key = self.keyspace.table_key(schema.table_name());
        match self.store.get(&key).await? {
            Some(_) => Ok(()),
            None => Err(ResourceError::TableDoesNotExist.into()),
        }
    }

    /// Keys of the records a condition targets, existing or not.
    async fn keys(&self, schema: &ModelSchema, condition: &Condition) -> StorageResult<Vec<String>> {
        let table = schema.table_name();
        match compile_key_lookup(BACKEND_NAME, condition)? {
            KeyLookup::All => {
                let mut keys = self
                    .store
                    .list(&self.keyspace.records_prefix(table))
                    .await?;
                keys.sort_by(|a, b| id_order(self.keyspace.leaf(a), self.keyspace.leaf(b)));
                Ok(keys)
            }
            KeyLookup::Ids(ids) => Ok(ids
                .iter()
                .map(|id| self.keyspace.record_key(table, id))
                .collect()),
        }
    }

    /// Loads the records a condition targets, with their keys.
    async fn load(
        &self,
        schema: &ModelSchema,
        condition: &Condition,
    ) -> StorageResult<Vec<(String, Record)>> {
        let mut records = Vec::new();
        for key in self.keys(schema, condition).await? {
            tracing::debug!(key = %key, "key-value get");
            if let Some(Value::Object(record)) = self.store.get(&key).await? {
                records.push((key, record));
            }
        }
        Ok(records)
    }

    /// Normalizes the declared columns of `record` for storage.
    fn stored(&self, schema: &ModelSchema, record: &Record, id: Value) -> StorageResult<Record> {
        let mut stored = Record::new();
        for property in schema.properties() {
            if property.primary_key {
                continue;
            }
            if let Some(value) = get_path(record, &property.name) {
                set_path(&mut stored, &property.name, property.normalize(value)?);
            }
        }
        stored.insert("id".to_string(), id);
        Ok(stored)
    }

    fn reject_unsupported(&self, query: &Query) -> StorageResult<()> {
        if !query.order.is_empty() {
            return Err(StorageError::unsupported(
                BACKEND_NAME,
                BackendCapability::Ordering.to_string(),
            ));
        }
        if query.group.is_some() {
            return Err(StorageError::unsupported(
                BACKEND_NAME,
                BackendCapability::Grouping.to_string(),
            ));
        }
        Ok(())
    }
}

/// Numeric ids in numeric order, then everything else lexically.
fn id_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

fn project(record: Record, select: &[String]) -> Record {
    let mut projected = Record::new();
    if let Some(id) = record.get("id") {
        projected.insert("id".to_string(), id.clone());
    }
    for column in select {
        if let Some(value) = get_path(&record, column) {
            set_path(&mut projected, column, value.clone());
        }
    }
    projected
}

fn increment(current: Option<&Value>, amount: &Value) -> Value {
    match (current.and_then(Value::as_i64), amount.as_i64()) {
        (Some(current), Some(amount)) => Value::from(current + amount),
        (None, Some(amount)) if current.is_none_or(Value::is_null) => Value::from(amount),
        _ => {
            let current = current.and_then(Value::as_f64).unwrap_or(0.0);
            Value::from(current + amount.as_f64().unwrap_or(0.0))
        }
    }
}

#[async_trait]
impl Adapter for KvAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn supports(&self, capability: BackendCapability) -> bool {
        matches!(
            capability,
            BackendCapability::Streaming | BackendCapability::AlterTable
        )
    }

    async fn get_schemas(&self) -> StorageResult<SchemaSnapshot> {
        let mut tables = HashMap::new();
        for key in self.store.list(&self.keyspace.tables_prefix()).await? {
            let table = self.keyspace.leaf(&key).to_string();
            let mut snapshot = TableSnapshot::schemaless();
            for index in self
                .store
                .list(&self.keyspace.indexes_prefix(&table))
                .await?
            {
                snapshot.indexes.insert(self.keyspace.leaf(&index).to_string());
            }
            tables.insert(table, snapshot);
        }
        Ok(SchemaSnapshot { tables })
    }

    async fn create_table(&self, schema: &ModelSchema) -> StorageResult<()> {
        let table = schema.table_name();
        tracing::debug!(table, "key-value create table");
        self.store
            .set(&self.keyspace.table_key(table), &json!({"model": schema.name()}))
            .await
    }

    async fn add_column(&self, _schema: &ModelSchema, _column: &str) -> StorageResult<()> {
        Ok(())
    }

    /// Records the index so synchronization converges; it is not enforced.
    async fn create_index(
        &self,
        schema: &ModelSchema,
        name: &str,
        index: &IndexDescriptor,
    ) -> StorageResult<()> {
        let columns: Vec<&str> = index.columns.iter().map(|(c, _)| c.as_str()).collect();
        self.store
            .set(
                &self.keyspace.index_key(schema.table_name(), name),
                &json!({"columns": columns, "unique": index.unique}),
            )
            .await
    }

    async fn create_foreign_key(
        &self,
        _schema: &ModelSchema,
        _column: &str,
        _parent: &ModelSchema,
        _action: IntegrityAction,
    ) -> StorageResult<()> {
        Err(StorageError::unsupported(
            BACKEND_NAME,
            BackendCapability::NativeIntegrity.to_string(),
        ))
    }

    async fn drop_table(&self, schema: &ModelSchema) -> StorageResult<()> {
        let table = schema.table_name();
        let mut keys = self.store.list(&self.keyspace.records_prefix(table)).await?;
        keys.extend(self.store.list(&self.keyspace.indexes_prefix(table)).await?);
        keys.push(self.keyspace.counter_key(table));
        keys.push(self.keyspace.table_key(table));
        for key in keys {
            self.store.delete(&key).await?;
        }
        Ok(())
    }

    async fn create(&self, schema: &ModelSchema, record: &Record) -> StorageResult<Value> {
        self.ensure_table(schema).await?;
        let table = schema.table_name();

        let id = match record.get("id").filter(|id| !id.is_null()) {
            Some(id) => {
                let key = self.keyspace.record_key(table, &key_of(BACKEND_NAME, id)?);
                if self.store.get(&key).await?.is_some() {
                    return Err(IntegrityError::Duplicated {
                        column: Some("id".to_string()),
                    }
                    .into());
                }
                id.clone()
            }
            None => Value::from(
                self.store
                    .increment(&self.keyspace.counter_key(table))
                    .await?,
            ),
        };

        let stored = self.stored(schema, record, id.clone())?;
        let key = self.keyspace.record_key(table, &key_of(BACKEND_NAME, &id)?);
        tracing::debug!(key = %key, "key-value set");
        self.store.set(&key, &Value::Object(stored)).await?;
        Ok(id)
    }

    async fn update(&self, schema: &ModelSchema, record: &Record) -> StorageResult<()> {
        self.ensure_table(schema).await?;
        let id = record
            .get("id")
            .filter(|id| !id.is_null())
            .ok_or(ResourceError::NotFound)?;
        let key = self
            .keyspace
            .record_key(schema.table_name(), &key_of(BACKEND_NAME, id)?);
        if self.store.get(&key).await?.is_none() {
            return Err(ResourceError::NotFound.into());
        }
        let stored = self.stored(schema, record, id.clone())?;
        self.store.set(&key, &Value::Object(stored)).await
    }

    async fn update_partial(
        &self,
        schema: &ModelSchema,
        update: &UpdateSpec,
        condition: &Condition,
    ) -> StorageResult<u64> {
        self.ensure_table(schema).await?;
        let mut updated = 0;
        for (key, mut record) in self.load(schema, condition).await? {
            for op in update.ops() {
                match op {
                    UpdateOp::Set { column, value } => {
                        set_path(&mut record, column, value.clone());
                    }
                    UpdateOp::Inc { column, amount } => {
                        let next = increment(get_path(&record, column), amount);
                        set_path(&mut record, column, next);
                    }
                }
            }
            self.store.set(&key, &Value::Object(record)).await?;
            updated += 1;
        }
        Ok(updated)
    }

    async fn find_by_id(&self, schema: &ModelSchema, id: &Value) -> StorageResult<Record> {
        self.ensure_table(schema).await?;
        let key = self
            .keyspace
            .record_key(schema.table_name(), &key_of(BACKEND_NAME, id)?);
        match self.store.get(&key).await? {
            Some(Value::Object(record)) => Ok(record),
            Some(other) => Err(StorageError::unexpected(format!(
                "key '{}' holds {}",
                key, other
            ))),
            None => Err(ResourceError::NotFound.into()),
        }
    }

    async fn find(&self, schema: &ModelSchema, query: &Query) -> StorageResult<Vec<Record>> {
        self.reject_unsupported(query)?;
        self.ensure_table(schema).await?;
        let skip = query.skip.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(self
            .load(schema, &query.condition)
            .await?
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|(_, record)| match &query.select {
                Some(select) => project(record, select),
                None => record,
            })
            .collect())
    }

    async fn stream(&self, schema: Arc<ModelSchema>, query: Query) -> StorageResult<RecordStream> {
        let records = self.find(&schema, &query).await?;
        Ok(Box::pin(futures::stream::iter(records.into_iter().map(Ok))))
    }

    async fn count(&self, schema: &ModelSchema, condition: &Condition) -> StorageResult<u64> {
        self.ensure_table(schema).await?;
        Ok(self.load(schema, condition).await?.len() as u64)
    }

    async fn delete(&self, schema: &ModelSchema, condition: &Condition) -> StorageResult<u64> {
        self.ensure_table(schema).await?;
        let mut deleted = 0;
        for key in self.keys(schema, condition).await? {
            if self.store.delete(&key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Property;

    fn user() -> ModelSchema {
        let mut user = ModelSchema::new("User");
        user.add_column("name", Property::string()).unwrap();
        user.add_column("visits", Property::integer()).unwrap();
        user
    }

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => Record::new(),
        }
    }

    #[test]
    fn test_keyspace_layout() {
        let keyspace = KvKeyspace::new(Some("/app/".to_string()));
        assert_eq!(keyspace.record_key("users", "7"), "app/data/users/7");
        assert_eq!(keyspace.records_prefix("users"), "app/data/users/");
        assert_eq!(keyspace.counter_key("users"), "app/_ids/users");
        assert_eq!(keyspace.leaf("app/data/users/7"), "7");

        let bare = KvKeyspace::new(None);
        assert_eq!(bare.index_key("users", "users_name"), "_indexes/users/users_name");
    }

    #[test]
    fn test_id_order_is_numeric() {
        let mut ids = vec!["10", "2", "b", "1", "a"];
        ids.sort_by(|a, b| id_order(a, b));
        assert_eq!(ids, vec!["1", "2", "10", "a", "b"]);
    }

    #[tokio::test]
    async fn test_crud_by_id() {
        let adapter = KvAdapter::in_memory();
        let schema = user();

        let err = adapter
            .create(&schema, &record(json!({"name": "A"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "table does not exist");

        adapter.create_table(&schema).await.unwrap();
        let first = adapter
            .create(&schema, &record(json!({"name": "A", "visits": 1})))
            .await
            .unwrap();
        let second = adapter
            .create(&schema, &record(json!({"name": "B"})))
            .await
            .unwrap();
        assert_eq!(first, json!(1));
        assert_eq!(second, json!(2));

        let found = adapter.find_by_id(&schema, &json!(1)).await.unwrap();
        assert_eq!(found["name"], json!("A"));

        let updated = adapter
            .update_partial(
                &schema,
                &UpdateSpec::new().inc("visits", 2),
                &Condition::is_in("id", vec![json!(1), json!(2)]),
            )
            .await
            .unwrap();
        assert_eq!(updated, 2);
        let found = adapter.find_by_id(&schema, &json!(2)).await.unwrap();
        assert_eq!(found["visits"], json!(2));
        let found = adapter.find_by_id(&schema, &json!(1)).await.unwrap();
        assert_eq!(found["visits"], json!(3));

        assert_eq!(adapter.count(&schema, &Condition::all()).await.unwrap(), 2);
        assert_eq!(
            adapter.delete(&schema, &Condition::id(json!(1))).await.unwrap(),
            1
        );
        assert!(
            adapter
                .find_by_id(&schema, &json!(1))
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_explicit_id_collision() {
        let adapter = KvAdapter::in_memory();
        let schema = user();
        adapter.create_table(&schema).await.unwrap();
        adapter
            .create(&schema, &record(json!({"id": "abc", "name": "A"})))
            .await
            .unwrap();
        let err = adapter
            .create(&schema, &record(json!({"id": "abc", "name": "B"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "duplicated id");
    }

    #[tokio::test]
    async fn test_capability_gaps() {
        let adapter = KvAdapter::in_memory();
        let schema = user();
        adapter.create_table(&schema).await.unwrap();

        let err = adapter
            .find(&schema, &Query::filter(Condition::eq("name", json!("A"))))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "capability 'condition on column 'name'' not supported by key-value"
        );

        let err = adapter
            .find(&schema, &Query::new().order("name"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "capability 'ordering' not supported by key-value"
        );
    }

    #[tokio::test]
    async fn test_paging_and_projection() {
        let adapter = KvAdapter::in_memory();
        let schema = user();
        adapter.create_table(&schema).await.unwrap();
        for i in 0..12 {
            adapter
                .create(&schema, &record(json!({"name": format!("u{}", i), "visits": i})))
                .await
                .unwrap();
        }

        let page = adapter
            .find(&schema, &Query::new().skip(9).limit(2).select("name"))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["id"], json!(10));
        assert_eq!(page[0]["name"], json!("u9"));
        assert!(!page[0].contains_key("visits"));
    }

    #[tokio::test]
    async fn test_drop_and_introspection() {
        let adapter = KvAdapter::in_memory();
        let schema = user();
        adapter.create_table(&schema).await.unwrap();
        adapter
            .create_index(&schema, "users_name", &IndexDescriptor::on("name"))
            .await
            .unwrap();

        let snapshot = adapter.get_schemas().await.unwrap();
        assert!(snapshot.has_index("users", "users_name"));
        assert!(snapshot.table("users").unwrap().columns.is_none());

        adapter.drop_table(&schema).await.unwrap();
        assert!(adapter.get_schemas().await.unwrap().tables.is_empty());
    }

    #[test]
    fn test_increment_keeps_integers() {
        assert_eq!(increment(Some(&json!(2)), &json!(3)), json!(5));
        assert_eq!(increment(None, &json!(3)), json!(3));
        assert_eq!(increment(Some(&json!(1.5)), &json!(1)), json!(2.5));
    }
}
