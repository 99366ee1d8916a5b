//! SQLite schema introspection.

use std::collections::HashMap;

use rusqlite::Connection;

use crate::error::StorageResult;
use crate::schema::{
    ColumnSnapshot, ForeignKeySnapshot, SchemaSnapshot, TableSnapshot,
};

/// Reads every user table with its columns, indexes and foreign keys.
pub(super) fn introspect(conn: &Connection) -> StorageResult<SchemaSnapshot> {
    let mut snapshot = SchemaSnapshot::default();

    let tables: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
        names.collect::<Result<_, _>>()?
    };

    for table in tables {
        let quoted = table.replace('"', "\"\"");

        let mut columns = HashMap::new();
        let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", quoted))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            let type_name: String = row.get(2)?;
            let not_null: i64 = row.get(3)?;
            columns.insert(
                name,
                ColumnSnapshot {
                    type_name,
                    required: not_null != 0,
                },
            );
        }

        let mut entry = TableSnapshot::with_columns(columns);

        let mut stmt = conn.prepare(&format!("PRAGMA index_list(\"{}\")", quoted))?;
        let indexes = stmt.query_map([], |row| row.get::<_, String>(1))?;
        for index in indexes {
            entry.indexes.insert(index?);
        }

        let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list(\"{}\")", quoted))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            entry.foreign_keys.push(ForeignKeySnapshot {
                referenced_table: row.get(2)?,
                column: row.get(3)?,
            });
        }

        snapshot.tables.insert(table, entry);
    }

    Ok(snapshot)
}
