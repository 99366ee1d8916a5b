//! Live schema as reported by a backend.

use std::collections::{HashMap, HashSet};

/// One introspected column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSnapshot {
    /// Native type name as the backend reports it.
    pub type_name: String,
    pub required: bool,
}

/// One introspected foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeySnapshot {
    pub column: String,
    pub referenced_table: String,
}

/// One introspected table or collection.
#[derive(Debug, Clone, Default)]
pub struct TableSnapshot {
    /// `None` for schemaless stores, where column diffing does not apply.
    pub columns: Option<HashMap<String, ColumnSnapshot>>,
    pub indexes: HashSet<String>,
    pub foreign_keys: Vec<ForeignKeySnapshot>,
}

impl TableSnapshot {
    /// A table of a schemaless store.
    pub fn schemaless() -> Self {
        Self::default()
    }

    /// A table with a fixed column set.
    pub fn with_columns(columns: HashMap<String, ColumnSnapshot>) -> Self {
        Self {
            columns: Some(columns),
            ..Self::default()
        }
    }
}

/// Tables keyed by name. Produced once per synchronization pass.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    pub tables: HashMap<String, TableSnapshot>,
}

impl SchemaSnapshot {
    pub fn table(&self, name: &str) -> Option<&TableSnapshot> {
        self.tables.get(name)
    }

    /// True when the table exists and the column is present, or the table is schemaless.
    pub fn has_column(&self, table: &str, column: &str) -> bool {
        match self.tables.get(table) {
            Some(TableSnapshot { columns: Some(columns), .. }) => columns.contains_key(column),
            Some(TableSnapshot { columns: None, .. }) => true,
            None => false,
        }
    }

    pub fn has_index(&self, table: &str, name: &str) -> bool {
        self.tables
            .get(table)
            .is_some_and(|t| t.indexes.contains(name))
    }

    pub fn has_foreign_key(&self, table: &str, column: &str, referenced_table: &str) -> bool {
        self.tables.get(table).is_some_and(|t| {
            t.foreign_keys
                .iter()
                .any(|fk| fk.column == column && fk.referenced_table == referenced_table)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemaless_tables_report_every_column() {
        let mut snapshot = SchemaSnapshot::default();
        snapshot
            .tables
            .insert("users".to_string(), TableSnapshot::schemaless());
        let mut columns = HashMap::new();
        columns.insert(
            "name".to_string(),
            ColumnSnapshot {
                type_name: "TEXT".to_string(),
                required: false,
            },
        );
        snapshot
            .tables
            .insert("posts".to_string(), TableSnapshot::with_columns(columns));

        assert!(snapshot.has_column("users", "anything"));
        assert!(snapshot.has_column("posts", "name"));
        assert!(!snapshot.has_column("posts", "title"));
        assert!(!snapshot.has_column("comments", "name"));
    }

    #[test]
    fn test_foreign_key_lookup() {
        let mut table = TableSnapshot::schemaless();
        table.foreign_keys.push(ForeignKeySnapshot {
            column: "user_id".to_string(),
            referenced_table: "users".to_string(),
        });
        table.indexes.insert("posts_title".to_string());
        let mut snapshot = SchemaSnapshot::default();
        snapshot.tables.insert("posts".to_string(), table);

        assert!(snapshot.has_foreign_key("posts", "user_id", "users"));
        assert!(!snapshot.has_foreign_key("posts", "user_id", "groups"));
        assert!(snapshot.has_index("posts", "posts_title"));
        assert!(!snapshot.has_index("users", "posts_title"));
    }
}
