//! Declared schema of a single model.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{StorageResult, ValidationError};
use crate::types::{Property, Record};

use super::callback::{Callback, CallbackEvent, Callbacks};
use super::index::IndexDescriptor;
use super::integrity::{Association, IntegrityDescriptor, IntegrityRole};

/// Columns, indexes, associations and integrity rules of one model.
///
/// Built incrementally. Adding columns after a synchronization pass is
/// allowed; the registry bumps its generation and the next pass picks the
/// new columns up.
#[derive(Debug, Clone)]
pub struct ModelSchema {
    name: String,
    table_name: String,
    properties: Vec<Property>,
    positions: HashMap<String, usize>,
    nested_prefixes: BTreeSet<String>,
    indexes: Vec<IndexDescriptor>,
    integrities: Vec<IntegrityDescriptor>,
    associations: Vec<Association>,
    archive: bool,
    callbacks: Callbacks,
}

impl ModelSchema {
    /// Creates a model with only the implicit `id` column.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let table_name = tableize(&name);
        let id = Property::primary_id();
        let mut positions = HashMap::new();
        positions.insert(id.name.clone(), 0);
        Self {
            name,
            table_name,
            properties: vec![id],
            positions,
            nested_prefixes: BTreeSet::new(),
            indexes: Vec::new(),
            integrities: Vec::new(),
            associations: Vec::new(),
            archive: false,
            callbacks: Callbacks::default(),
        }
    }

    /// Overrides the derived table (or collection) name.
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Copies deleted rows into the archive table before removal.
    pub fn with_archive(mut self) -> Self {
        self.archive = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn archives(&self) -> bool {
        self.archive
    }

    /// Declares a column.
    ///
    /// Re-declaring an existing column must repeat its type, array flag and
    /// storage name; the only accepted change is turning `required` on.
    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        mut property: Property,
    ) -> Result<(), ValidationError> {
        let name = name.into();
        property.name = name.clone();
        if property.storage_name.is_empty() {
            property.storage_name = name.replace('.', "_");
        }

        if let Some(&position) = self.positions.get(&name) {
            let existing = &mut self.properties[position];
            if existing.column_type != property.column_type
                || existing.array != property.array
                || existing.storage_name != property.storage_name
            {
                return Err(ValidationError::ColumnRedefinition(name));
            }
            if property.required {
                existing.required = true;
            }
            return Ok(());
        }

        let mut prefix = String::new();
        let segments: Vec<&str> = name.split('.').collect();
        for segment in &segments[..segments.len() - 1] {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(segment);
            self.nested_prefixes.insert(prefix.clone());
        }

        if property.unique {
            self.add_index(IndexDescriptor::on(name.clone()).unique());
        }
        self.positions.insert(name, self.properties.len());
        self.properties.push(property);
        Ok(())
    }

    /// Declares an index. An index with the same resolved name replaces the
    /// earlier declaration.
    pub fn add_index(&mut self, index: IndexDescriptor) {
        let name = index.resolved_name(&self.table_name);
        self.indexes
            .retain(|existing| existing.resolved_name(&self.table_name) != name);
        self.indexes.push(index);
    }

    /// Registers a callback for a lifecycle event.
    pub fn on(&mut self, event: CallbackEvent, callback: Callback) {
        self.callbacks.declare(event, callback);
    }

    /// Adds an entry to the method table that `Callback::Method` names resolve against.
    pub fn define_method<F>(&mut self, name: impl Into<String>, method: F)
    where
        F: Fn(&mut Record) -> StorageResult<()> + Send + Sync + 'static,
    {
        self.callbacks.define_method(name.into(), Arc::new(method));
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.positions.get(name).map(|&i| &self.properties[i])
    }

    pub fn property_by_storage_name(&self, storage_name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.storage_name == storage_name)
    }

    /// All columns in declaration order, `id` first.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// True when `name` is a dotted-path prefix such as `address` for `address.city`.
    pub fn is_nested_prefix(&self, name: &str) -> bool {
        self.nested_prefixes.contains(name)
    }

    /// Indexes with their resolved names.
    pub fn indexes(&self) -> impl Iterator<Item = (String, &IndexDescriptor)> {
        self.indexes
            .iter()
            .map(|index| (index.resolved_name(&self.table_name), index))
    }

    pub fn integrities(&self) -> &[IntegrityDescriptor] {
        &self.integrities
    }

    /// Integrity descriptors this model owns as the referenced side.
    pub fn parent_integrities(&self) -> impl Iterator<Item = &IntegrityDescriptor> {
        self.integrities
            .iter()
            .filter(|d| d.role == IntegrityRole::Parent)
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.name == name)
    }

    pub(crate) fn add_integrity(&mut self, descriptor: IntegrityDescriptor) {
        if !self.integrities.contains(&descriptor) {
            self.integrities.push(descriptor);
        }
    }

    pub(crate) fn add_association(&mut self, association: Association) {
        self.associations.retain(|a| a.name != association.name);
        self.associations.push(association);
    }

    pub(crate) fn resolve_callbacks(&mut self) -> Result<(), ValidationError> {
        self.callbacks.resolve()
    }

    pub(crate) fn run_callbacks(
        &self,
        event: CallbackEvent,
        record: &mut Record,
    ) -> StorageResult<()> {
        self.callbacks.run(event, record)
    }
}

/// Converts `UserProfile` to `user_profile`.
pub fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = if i > 0 { Some(chars[i - 1]) } else { None };
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Derives a table name from a model name: `User` to `users`, `Category` to `categories`.
pub fn tableize(name: &str) -> String {
    let snake = snake_case(name);
    if let Some(stem) = snake.strip_suffix('y') {
        if stem
            .chars()
            .last()
            .is_some_and(|c| !matches!(c, 'a' | 'e' | 'i' | 'o' | 'u'))
        {
            return format!("{}ies", stem);
        }
    }
    if ["s", "x", "z", "ch", "sh"]
        .iter()
        .any(|suffix| snake.ends_with(suffix))
    {
        return format!("{}es", snake);
    }
    format!("{}s", snake)
}
