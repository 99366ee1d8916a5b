//! Referential integrity and archival applied at delete time.
//!
//! The [`CascadeEngine`] runs in front of every condition delete issued
//! through a connection. When the backend enforces foreign keys itself the
//! engine only archives; otherwise it also applies the parent-side rules of
//! the model being deleted:
//!
//! | Action | Effect on referencing rows |
//! |--------|----------------------------|
//! | `restrict` | the whole delete fails with `rejected` if any exist |
//! | `nullify` | their foreign key is set to null |
//! | `delete` | they are deleted (one level only) |
//!
//! Restrict checks run before anything is written. The remaining steps are
//! separate round trips with no transaction around them, so a failure
//! between two steps leaves the earlier ones applied.

use std::sync::Arc;

use serde_json::Value;

use crate::condition::{Condition, Query, UpdateSpec};
use crate::core::{Adapter, BackendCapability};
use crate::error::{IntegrityError, StorageResult};
use crate::schema::{ARCHIVE_MODEL, IntegrityAction, IntegrityDescriptor, ModelRegistry, ModelSchema};
use crate::types::Record;
use crate::types::record::record_id;

/// Applies integrity rules and archival before a delete.
#[derive(Debug, Clone, Copy, Default)]
pub struct CascadeEngine;

impl CascadeEngine {
    pub fn new() -> Self {
        Self
    }

    /// Deletes the records of `schema` matching `condition`, returning how
    /// many were removed.
    pub async fn delete(
        &self,
        registry: &ModelRegistry,
        adapter: &dyn Adapter,
        schema: &ModelSchema,
        condition: &Condition,
    ) -> StorageResult<u64> {
        let rules = self.pending_rules(adapter, schema);
        if !schema.archives() && rules.is_empty() {
            return adapter.delete(schema, condition).await;
        }

        let query = if schema.archives() {
            Query::filter(condition.clone())
        } else {
            Query::filter(condition.clone()).select("id")
        };
        let victims = adapter.find(schema, &query).await?;
        if victims.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Value> = victims
            .iter()
            .filter_map(|row| record_id(row).cloned())
            .collect();

        let mut children = Vec::with_capacity(rules.len());
        for rule in &rules {
            children.push((rule, registry.get(&rule.counterpart)?));
        }

        for (rule, child) in children
            .iter()
            .filter(|(rule, _)| rule.action == IntegrityAction::Restrict)
        {
            let referencing = adapter
                .count(child, &Condition::is_in(rule.column.clone(), ids.clone()))
                .await?;
            if referencing > 0 {
                tracing::debug!(
                    model = schema.name(),
                    child = child.name(),
                    referencing,
                    "delete restricted by referencing records"
                );
                return Err(IntegrityError::Rejected.into());
            }
        }

        if schema.archives() {
            self.archive(registry, adapter, schema, victims).await?;
        }

        if !rules.is_empty() {
            tracing::warn!(
                backend = adapter.name(),
                model = schema.name(),
                rules = rules.len(),
                "applying integrity rules without native enforcement"
            );
        }
        for (rule, child) in &children {
            let references = Condition::is_in(rule.column.clone(), ids.clone());
            match rule.action {
                IntegrityAction::Nullify => {
                    let update = UpdateSpec::new().set(rule.column.clone(), Value::Null);
                    adapter.update_partial(child, &update, &references).await?;
                }
                IntegrityAction::Delete => {
                    adapter.delete(child, &references).await?;
                }
                IntegrityAction::Restrict => {}
            }
        }

        adapter.delete(schema, condition).await
    }

    /// Parent-side rules the backend does not enforce itself.
    fn pending_rules<'a>(
        &self,
        adapter: &dyn Adapter,
        schema: &'a ModelSchema,
    ) -> Vec<&'a IntegrityDescriptor> {
        if adapter.supports(BackendCapability::NativeIntegrity) {
            return Vec::new();
        }
        schema.parent_integrities().collect()
    }

    async fn archive(
        &self,
        registry: &ModelRegistry,
        adapter: &dyn Adapter,
        schema: &ModelSchema,
        victims: Vec<Record>,
    ) -> StorageResult<()> {
        let archive: Arc<ModelSchema> = registry.get(ARCHIVE_MODEL)?;
        let entries: Vec<Record> = victims
            .into_iter()
            .map(|row| {
                let mut entry = Record::new();
                entry.insert("model".to_string(), Value::String(schema.name().to_string()));
                entry.insert("data".to_string(), Value::Object(row));
                entry
            })
            .collect();
        tracing::debug!(model = schema.name(), rows = entries.len(), "archiving records");
        adapter.create_bulk(&archive, &entries).await?;
        Ok(())
    }
}
