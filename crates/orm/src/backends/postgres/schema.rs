//! PostgreSQL schema introspection through `information_schema` and `pg_indexes`.

use std::collections::HashMap;

use tokio_postgres::Client;

use crate::error::StorageResult;
use crate::schema::{ColumnSnapshot, ForeignKeySnapshot, SchemaSnapshot, TableSnapshot};

const TABLES: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'";

const COLUMNS: &str = "SELECT table_name::text, column_name::text, data_type::text, \
     is_nullable::text FROM information_schema.columns WHERE table_schema = current_schema()";

const INDEXES: &str =
    "SELECT tablename::text, indexname::text FROM pg_indexes WHERE schemaname = current_schema()";

const FOREIGN_KEYS: &str = "SELECT kcu.table_name::text, kcu.column_name::text, \
     ccu.table_name::text \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
     JOIN information_schema.constraint_column_usage ccu \
       ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
     WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = current_schema()";

pub(super) async fn introspect(client: &Client) -> StorageResult<SchemaSnapshot> {
    let mut tables: HashMap<String, TableSnapshot> = HashMap::new();

    for row in client.query(TABLES, &[]).await? {
        tables.insert(row.try_get(0)?, TableSnapshot::with_columns(HashMap::new()));
    }

    for row in client.query(COLUMNS, &[]).await? {
        let table: String = row.try_get(0)?;
        let column: String = row.try_get(1)?;
        let type_name: String = row.try_get(2)?;
        let nullable: String = row.try_get(3)?;
        if let Some(columns) = tables.get_mut(&table).and_then(|t| t.columns.as_mut()) {
            columns.insert(
                column,
                ColumnSnapshot {
                    type_name,
                    required: nullable == "NO",
                },
            );
        }
    }

    for row in client.query(INDEXES, &[]).await? {
        let table: String = row.try_get(0)?;
        if let Some(entry) = tables.get_mut(&table) {
            entry.indexes.insert(row.try_get(1)?);
        }
    }

    for row in client.query(FOREIGN_KEYS, &[]).await? {
        let table: String = row.try_get(0)?;
        if let Some(entry) = tables.get_mut(&table) {
            entry.foreign_keys.push(ForeignKeySnapshot {
                column: row.try_get(1)?,
                referenced_table: row.try_get(2)?,
            });
        }
    }

    Ok(SchemaSnapshot { tables })
}
