//! The explicit set of models a connection manages.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{QueryError, StorageResult, ValidationError};
use crate::types::{ColumnType, Property};

use super::index::IndexDescriptor;
use super::integrity::{Association, AssociationKind, IntegrityAction, IntegrityDescriptor};
use super::model::{ModelSchema, snake_case, tableize};

/// Name of the reserved model that receives archived rows.
pub const ARCHIVE_MODEL: &str = "_Archive";

/// Options for [`ModelRegistry::has_many`].
#[derive(Debug, Clone, Default)]
pub struct HasManyOptions {
    /// Accessor name; defaults to the child's table name (`posts`).
    pub name: Option<String>,
    /// Foreign key on the child; defaults to `<parent>_id`.
    pub foreign_key: Option<String>,
    /// `None` means no referential rule is enforced.
    pub integrity: Option<IntegrityAction>,
}

impl HasManyOptions {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    pub fn integrity(mut self, action: IntegrityAction) -> Self {
        self.integrity = Some(action);
        self
    }
}

/// Options for [`ModelRegistry::has_one`]; the accessor defaults to `profile` for `Profile`.
pub type HasOneOptions = HasManyOptions;

/// Options for [`ModelRegistry::belongs_to`].
#[derive(Debug, Clone, Default)]
pub struct BelongsToOptions {
    /// Accessor name; defaults to the parent in snake case (`user`).
    pub name: Option<String>,
    pub foreign_key: Option<String>,
    pub required: bool,
}

impl BelongsToOptions {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Models keyed by name.
///
/// Schemas are stored behind `Arc` and replaced copy-on-write, so readers keep
/// a consistent view while declarations continue. Every change bumps
/// [`generation`](Self::generation), which the synchronizer compares against
/// the last generation it applied.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: RwLock<BTreeMap<String, Arc<ModelSchema>>>,
    generation: AtomicU64,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a model and resolves its callbacks.
    pub fn define(&self, mut schema: ModelSchema) -> StorageResult<Arc<ModelSchema>> {
        schema.resolve_callbacks()?;
        let archives = schema.archives();
        let schema = Arc::new(schema);
        {
            let mut models = self.models.write();
            models.insert(schema.name().to_string(), schema.clone());
            if archives && !models.contains_key(ARCHIVE_MODEL) {
                models.insert(ARCHIVE_MODEL.to_string(), Arc::new(archive_model()?));
            }
        }
        self.bump();
        tracing::debug!(model = schema.name(), table = schema.table_name(), "Defined model");
        Ok(schema)
    }

    pub fn get(&self, name: &str) -> StorageResult<Arc<ModelSchema>> {
        self.models
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::UnknownModel(name.to_string()).into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.read().contains_key(name)
    }

    /// Every registered model, ordered by name.
    pub fn models(&self) -> Vec<Arc<ModelSchema>> {
        self.models.read().values().cloned().collect()
    }

    /// Removes a model from the registry.
    pub fn remove(&self, name: &str) -> Option<Arc<ModelSchema>> {
        let removed = self.models.write().remove(name);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// Current change counter.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Applies `change` to a copy of the named model and swaps it in.
    pub fn update<F>(&self, name: &str, change: F) -> StorageResult<Arc<ModelSchema>>
    where
        F: FnOnce(&mut ModelSchema) -> StorageResult<()>,
    {
        let updated = {
            let mut models = self.models.write();
            let current = models
                .get(name)
                .ok_or_else(|| QueryError::UnknownModel(name.to_string()))?;
            let mut schema = ModelSchema::clone(current);
            change(&mut schema)?;
            schema.resolve_callbacks()?;
            let archives = schema.archives();
            let schema = Arc::new(schema);
            models.insert(name.to_string(), schema.clone());
            if archives && !models.contains_key(ARCHIVE_MODEL) {
                models.insert(ARCHIVE_MODEL.to_string(), Arc::new(archive_model()?));
            }
            schema
        };
        self.bump();
        Ok(updated)
    }

    /// Declares a column on an already registered model.
    pub fn add_column(&self, model: &str, column: &str, property: Property) -> StorageResult<()> {
        self.update(model, |schema| Ok(schema.add_column(column, property)?))?;
        Ok(())
    }

    /// Declares an index on an already registered model.
    pub fn add_index(&self, model: &str, index: IndexDescriptor) -> StorageResult<()> {
        self.update(model, |schema| {
            schema.add_index(index);
            Ok(())
        })?;
        Ok(())
    }

    /// `parent` has many `child` records referencing it.
    pub fn has_many(&self, parent: &str, child: &str, options: HasManyOptions) -> StorageResult<()> {
        let name = options.name.clone().unwrap_or_else(|| tableize(child));
        self.link_owned(parent, child, name, AssociationKind::HasMany, options)
    }

    /// `parent` has at most one `child` record referencing it.
    pub fn has_one(&self, parent: &str, child: &str, options: HasOneOptions) -> StorageResult<()> {
        let name = options.name.clone().unwrap_or_else(|| snake_case(child));
        self.link_owned(parent, child, name, AssociationKind::HasOne, options)
    }

    /// `child` holds a reference to one `parent` record.
    pub fn belongs_to(
        &self,
        child: &str,
        parent: &str,
        options: BelongsToOptions,
    ) -> StorageResult<()> {
        self.get(parent)?;
        let foreign_key = options
            .foreign_key
            .unwrap_or_else(|| default_foreign_key(parent));
        let name = options.name.unwrap_or_else(|| snake_case(parent));
        let required = options.required;
        let parent = parent.to_string();
        self.update(child, move |schema| {
            let mut property = Property::record_id();
            if required {
                property = property.required();
            }
            schema.add_column(foreign_key.clone(), property)?;
            schema.add_association(Association {
                name,
                kind: AssociationKind::BelongsTo,
                counterpart: parent,
                foreign_key,
            });
            Ok(())
        })?;
        Ok(())
    }

    fn link_owned(
        &self,
        parent: &str,
        child: &str,
        name: String,
        kind: AssociationKind,
        options: HasManyOptions,
    ) -> StorageResult<()> {
        self.get(parent)?;
        self.get(child)?;
        let foreign_key = options
            .foreign_key
            .unwrap_or_else(|| default_foreign_key(parent));

        let (parent_rule, child_rule) = match options.integrity {
            Some(action) => {
                let (p, c) = IntegrityDescriptor::pair(parent, child, &foreign_key, action);
                (Some(p), Some(c))
            }
            None => (None, None),
        };

        let column = foreign_key.clone();
        self.update(child, move |schema| {
            schema.add_column(column, Property::record_id())?;
            if let Some(rule) = child_rule {
                schema.add_integrity(rule);
            }
            Ok(())
        })?;

        let counterpart = child.to_string();
        self.update(parent, move |schema| {
            schema.add_association(Association {
                name,
                kind,
                counterpart,
                foreign_key,
            });
            if let Some(rule) = parent_rule {
                schema.add_integrity(rule);
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Models ordered so that every model comes before the models it
    /// references. Dropping in this order never trips a foreign key.
    pub fn drop_order(&self) -> Vec<Arc<ModelSchema>> {
        let models = self.models.read();

        // referenced model -> models referencing it
        let mut referenced_by: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for schema in models.values() {
            for association in schema.associations() {
                let (referencing, referenced) = match association.kind {
                    AssociationKind::BelongsTo => {
                        (schema.name(), association.counterpart.as_str())
                    }
                    AssociationKind::HasOne | AssociationKind::HasMany => {
                        (association.counterpart.as_str(), schema.name())
                    }
                };
                if referencing != referenced {
                    referenced_by.entry(referenced).or_default().push(referencing);
                }
            }
        }

        fn visit<'a>(
            name: &'a str,
            referenced_by: &BTreeMap<&'a str, Vec<&'a str>>,
            visiting: &mut HashSet<&'a str>,
            done: &mut HashSet<&'a str>,
            order: &mut Vec<&'a str>,
        ) {
            if done.contains(name) || !visiting.insert(name) {
                return;
            }
            if let Some(children) = referenced_by.get(name) {
                for child in children {
                    visit(*child, referenced_by, visiting, done, order);
                }
            }
            visiting.remove(name);
            done.insert(name);
            order.push(name);
        }

        let mut visiting = HashSet::new();
        let mut done = HashSet::new();
        let mut order = Vec::with_capacity(models.len());
        for name in models.keys() {
            visit(name, &referenced_by, &mut visiting, &mut done, &mut order);
        }

        order
            .into_iter()
            .filter_map(|name| models.get(name).cloned())
            .collect()
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

fn default_foreign_key(parent: &str) -> String {
    format!("{}_id", snake_case(parent))
}

fn archive_model() -> Result<ModelSchema, ValidationError> {
    let mut schema = ModelSchema::new(ARCHIVE_MODEL);
    schema.add_column("model", Property::new(ColumnType::string()).required())?;
    schema.add_column("data", Property::object())?;
    Ok(schema)
}
