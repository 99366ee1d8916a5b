//! Schema synchronization.
//!
//! A pass introspects the live schema once and applies only what is missing,
//! in this order:
//!
//! 1. columns declared on existing tables (concurrently)
//! 2. missing tables with every declared column (concurrently)
//! 3. missing indexes, matched by name within their table (concurrently)
//! 4. native foreign keys for child-side integrity rules (serially, after
//!    the tables they reference exist)
//!
//! Nothing is ever dropped or retyped, so a converged schema produces an
//! empty [`SyncReport`].
//!
//! A unique index that cannot be built because existing rows already
//! collide is reported as unenforced instead of failing the pass; the
//! connection then checks those columns before every insert.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::core::{Adapter, BackendCapability};
use crate::error::StorageResult;
use crate::schema::{
    IndexDescriptor, IntegrityRole, ModelRegistry, ModelSchema, SchemaSnapshot,
};

/// Operations issued by one synchronization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub columns_added: usize,
    pub tables_created: usize,
    pub indexes_created: usize,
    pub foreign_keys_created: usize,
    /// Unique indexes (`table`, `index`) that existing rows prevented.
    pub unenforced_unique: Vec<(String, String)>,
}

impl SyncReport {
    /// True when the pass issued nothing.
    pub fn is_empty(&self) -> bool {
        self.operations() == 0 && self.unenforced_unique.is_empty()
    }

    /// Number of schema operations that succeeded.
    pub fn operations(&self) -> usize {
        self.columns_added + self.tables_created + self.indexes_created + self.foreign_keys_created
    }
}

/// Reconciles declared models with one backend.
///
/// At most one pass runs at a time. A caller that arrives while a pass is in
/// flight waits for it and then finds the registry generation already
/// applied, so DDL is never issued twice for the same declarations.
#[derive(Debug, Default)]
pub struct Synchronizer {
    applied_generation: Mutex<Option<u64>>,
    unenforced: RwLock<HashMap<String, Vec<IndexDescriptor>>>,
}

impl Synchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs a pass unless the registry has not changed since the last one.
    pub async fn ensure(
        &self,
        registry: &ModelRegistry,
        adapter: &dyn Adapter,
    ) -> StorageResult<SyncReport> {
        let mut applied = self.applied_generation.lock().await;
        let generation = registry.generation();
        if *applied == Some(generation) {
            return Ok(SyncReport::default());
        }
        let report = self.run(registry, adapter).await?;
        *applied = Some(generation);
        Ok(report)
    }

    /// Forgets the applied generation so the next [`ensure`](Self::ensure) runs a pass.
    pub async fn invalidate(&self) {
        *self.applied_generation.lock().await = None;
    }

    /// Unique indexes on `table` that the backend is not enforcing.
    pub fn unenforced_unique(&self, table: &str) -> Vec<IndexDescriptor> {
        self.unenforced
            .read()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Diffs and applies one pass unconditionally.
    pub async fn run(
        &self,
        registry: &ModelRegistry,
        adapter: &dyn Adapter,
    ) -> StorageResult<SyncReport> {
        let models = registry.models();
        let snapshot = adapter.get_schemas().await?;
        let mut report = SyncReport::default();

        let additions = missing_columns(&models, &snapshot);
        if !additions.is_empty() && !adapter.supports(BackendCapability::AlterTable) {
            tracing::warn!(
                backend = adapter.name(),
                columns = additions.len(),
                "backend cannot add columns to existing tables, skipping"
            );
        } else {
            try_join_all(
                additions
                    .iter()
                    .map(|(schema, column)| adapter.add_column(schema, column)),
            )
            .await?;
            report.columns_added = additions.len();
        }

        let missing_tables: Vec<&Arc<ModelSchema>> = models
            .iter()
            .filter(|schema| snapshot.table(schema.table_name()).is_none())
            .collect();
        try_join_all(missing_tables.iter().map(|schema| adapter.create_table(schema))).await?;
        report.tables_created = missing_tables.len();

        let missing_indexes: Vec<(&Arc<ModelSchema>, String, &IndexDescriptor)> = models
            .iter()
            .flat_map(|schema| {
                schema
                    .indexes()
                    .filter(|(name, _)| !snapshot.has_index(schema.table_name(), name))
                    .map(move |(name, index)| (schema, name, index))
            })
            .collect();
        let results = join_all(
            missing_indexes
                .iter()
                .map(|(schema, name, index)| adapter.create_index(schema, name, index)),
        )
        .await;

        let mut unenforced: HashMap<String, Vec<IndexDescriptor>> = HashMap::new();
        for ((schema, name, index), result) in missing_indexes.iter().zip(results) {
            match result {
                Ok(()) => report.indexes_created += 1,
                Err(err) if err.is_duplicated() && index.unique => {
                    tracing::warn!(
                        table = schema.table_name(),
                        index = %name,
                        "existing rows violate unique index, enforcing on insert instead"
                    );
                    unenforced
                        .entry(schema.table_name().to_string())
                        .or_default()
                        .push((*index).clone());
                    report
                        .unenforced_unique
                        .push((schema.table_name().to_string(), name.clone()));
                }
                Err(err) => return Err(err),
            }
        }
        *self.unenforced.write() = unenforced;

        if adapter.supports(BackendCapability::NativeIntegrity) {
            for schema in &models {
                for rule in schema
                    .integrities()
                    .iter()
                    .filter(|rule| rule.role == IntegrityRole::Child)
                {
                    let parent = registry.get(&rule.counterpart)?;
                    let column = schema
                        .property(&rule.column)
                        .map(|p| p.storage_name.as_str())
                        .unwrap_or(rule.column.as_str());
                    if snapshot.has_foreign_key(schema.table_name(), column, parent.table_name()) {
                        continue;
                    }
                    adapter
                        .create_foreign_key(schema, &rule.column, &parent, rule.action)
                        .await?;
                    report.foreign_keys_created += 1;
                }
            }
        }

        if report.is_empty() {
            tracing::debug!(backend = adapter.name(), "schema already synchronized");
        } else {
            tracing::info!(
                backend = adapter.name(),
                columns = report.columns_added,
                tables = report.tables_created,
                indexes = report.indexes_created,
                foreign_keys = report.foreign_keys_created,
                unenforced = report.unenforced_unique.len(),
                "schema synchronized"
            );
        }
        Ok(report)
    }
}

/// Declared columns absent from tables that exist. Schemaless tables have
/// no column set and never need columns added.
fn missing_columns<'a>(
    models: &'a [Arc<ModelSchema>],
    snapshot: &SchemaSnapshot,
) -> Vec<(&'a Arc<ModelSchema>, String)> {
    let mut missing = Vec::new();
    for schema in models {
        let Some(columns) = snapshot
            .table(schema.table_name())
            .and_then(|table| table.columns.as_ref())
        else {
            continue;
        };
        for property in schema.properties() {
            if !columns.contains_key(&property.storage_name) {
                missing.push((schema, property.name.clone()));
            }
        }
    }
    missing
}
