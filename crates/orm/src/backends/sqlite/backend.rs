//! SQLite adapter implementation.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql, ffi, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::backends::sql::{SelectPlan, SqlStatements};
use crate::compiler::sql::{SqlFragment, SqlParam, SqliteDialect};
use crate::condition::{Condition, Query, UpdateSpec};
use crate::core::{
    Adapter, AdapterSettings, BackendCapability, BackendKind, RecordStream,
};
use crate::error::{
    BackendError, IntegrityError, ResourceError, StorageError, StorageResult, ValidationError,
};
use crate::schema::{IndexDescriptor, IntegrityAction, ModelSchema, SchemaSnapshot};
use crate::types::Record;
use crate::types::record::format_date;

use super::schema;

const BACKEND_NAME: &str = "sqlite";

/// Rows a stream may run ahead of its consumer.
const STREAM_BUFFER: usize = 1;

static MEMORY_DATABASES: AtomicU64 = AtomicU64::new(0);

/// SQLite adapter.
pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteConfig,
    is_memory: bool,
    /// Keeps a shared in-memory database alive while pooled connections come and go.
    _memory_anchor: Option<Mutex<Connection>>,
}

impl Debug for SqliteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAdapter")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file, or `:memory:`.
    #[serde(default = "default_path")]
    pub path: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for file databases.
    #[serde(default = "default_true")]
    pub enable_wal: bool,
}

fn default_path() -> String {
    ":memory:".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
        }
    }
}

impl SqliteConfig {
    /// Reads the following environment variables:
    /// - `STRATA_SQLITE_PATH` (default: ":memory:")
    /// - `STRATA_SQLITE_MAX_CONNECTIONS` (default: 10)
    /// - `STRATA_SQLITE_BUSY_TIMEOUT_MS` (default: 5000)
    /// - `STRATA_SQLITE_WAL` (default: true)
    pub fn from_env() -> Self {
        Self {
            path: std::env::var("STRATA_SQLITE_PATH").unwrap_or_else(|_| default_path()),
            max_connections: std::env::var("STRATA_SQLITE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_connections),
            busy_timeout_ms: std::env::var("STRATA_SQLITE_BUSY_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_busy_timeout_ms),
            enable_wal: std::env::var("STRATA_SQLITE_WAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            ..Default::default()
        }
    }
}

impl From<&AdapterSettings> for SqliteConfig {
    fn from(settings: &AdapterSettings) -> Self {
        Self {
            path: settings.database.clone(),
            max_connections: settings.pool_size.unwrap_or_else(default_max_connections),
            ..Default::default()
        }
    }
}

impl SqliteAdapter {
    /// Creates a new in-memory SQLite adapter.
    pub fn in_memory() -> StorageResult<Self> {
        Self::with_config(SqliteConfig::default())
    }

    /// Opens or creates a file-based SQLite database.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::with_config(SqliteConfig {
            path: path.as_ref().to_string_lossy().into_owned(),
            ..Default::default()
        })
    }

    pub fn from_settings(settings: &AdapterSettings) -> StorageResult<Self> {
        Self::with_config(SqliteConfig::from(settings))
    }

    /// Creates an adapter with custom configuration.
    pub fn with_config(config: SqliteConfig) -> StorageResult<Self> {
        let is_memory = config.path == ":memory:";

        // every pooled connection must see the same in-memory database
        let target = if is_memory {
            format!(
                "file:strata-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                MEMORY_DATABASES.fetch_add(1, Ordering::Relaxed)
            )
        } else {
            config.path.clone()
        };

        let memory_anchor = if is_memory {
            Some(Mutex::new(Connection::open(&target)?))
        } else {
            None
        };

        let busy_timeout = std::time::Duration::from_millis(config.busy_timeout_ms as u64);
        let enable_wal = config.enable_wal && !is_memory;
        let manager = SqliteConnectionManager::file(&target).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            if enable_wal {
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            }
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(std::time::Duration::from_millis(
                config.connection_timeout_ms,
            ))
            .build(manager)?;

        tracing::debug!(path = %config.path, "opened sqlite pool");

        Ok(Self {
            pool,
            config,
            is_memory,
            _memory_anchor: memory_anchor,
        })
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    fn connection(&self) -> StorageResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn statements<'a>(&self, schema: &'a ModelSchema) -> SqlStatements<'a> {
        SqlStatements::new(&SqliteDialect, schema)
    }

    fn execute_ddl(&self, sql: &str) -> StorageResult<()> {
        tracing::debug!(sql, "sqlite ddl");
        self.connection()?.execute(sql, [])?;
        Ok(())
    }
}

fn execute(conn: &Connection, fragment: &SqlFragment) -> StorageResult<usize> {
    tracing::debug!(sql = %fragment.sql, params = fragment.params.len(), "sqlite execute");
    let mut stmt = conn.prepare_cached(&fragment.sql)?;
    Ok(stmt.execute(params_from_iter(fragment.params.iter()))?)
}

fn read_row(row: &rusqlite::Row<'_>, width: usize) -> StorageResult<Vec<SqlParam>> {
    let mut values = Vec::with_capacity(width);
    for i in 0..width {
        values.push(match row.get_ref(i)? {
            ValueRef::Null => SqlParam::Null,
            ValueRef::Integer(n) => SqlParam::Integer(n),
            ValueRef::Real(f) => SqlParam::Float(f),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                SqlParam::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        });
    }
    Ok(values)
}

/// Runs a select and hands each record to `sink` until it returns false.
fn query_each<F>(conn: &Connection, plan: &SelectPlan, mut sink: F) -> StorageResult<()>
where
    F: FnMut(Record) -> bool,
{
    let statement = &plan.statement;
    tracing::debug!(sql = %statement.sql, params = statement.params.len(), "sqlite query");
    let mut stmt = conn.prepare_cached(&statement.sql)?;
    let mut rows = stmt.query(params_from_iter(statement.params.iter()))?;
    while let Some(row) = rows.next()? {
        let record = plan.record(read_row(row, plan.columns.len())?)?;
        if !sink(record) {
            break;
        }
    }
    Ok(())
}

fn query(conn: &Connection, plan: &SelectPlan) -> StorageResult<Vec<Record>> {
    let mut records = Vec::new();
    query_each(conn, plan, |record| {
        records.push(record);
        true
    })?;
    Ok(records)
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParam::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlParam::Float(f) => ToSqlOutput::from(*f),
            SqlParam::Integer(n) => ToSqlOutput::from(*n),
            SqlParam::Bool(b) => ToSqlOutput::from(*b as i64),
            // text keeps millisecond dates sortable
            SqlParam::Timestamp(dt) => match format_date(dt) {
                Value::String(s) => ToSqlOutput::from(s),
                other => ToSqlOutput::from(other.to_string()),
            },
            SqlParam::Json(value) => ToSqlOutput::from(value.to_string()),
            SqlParam::Null => ToSqlOutput::from(rusqlite::types::Null),
        })
    }
}

/// Maps a driver error onto the error taxonomy.
///
/// Constraint failures are recognized by extended result code; the column is
/// taken from messages like `UNIQUE constraint failed: users.age`.
pub(crate) fn map_error(err: rusqlite::Error) -> StorageError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        let message = message.as_deref().unwrap_or_default();
        match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return IntegrityError::Duplicated {
                    column: constrained_column(message),
                }
                .into();
            }
            ffi::SQLITE_CONSTRAINT_NOTNULL => {
                let column = constrained_column(message).unwrap_or_default();
                return ValidationError::Required(column).into();
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return IntegrityError::Rejected.into(),
            _ => {}
        }
        if message.starts_with("no such table") {
            return ResourceError::TableDoesNotExist.into();
        }
    }
    StorageError::unknown(BACKEND_NAME, err)
}

/// The single column named in a constraint message, if exactly one is.
fn constrained_column(message: &str) -> Option<String> {
    let (_, columns) = message.split_once("constraint failed: ")?;
    if columns.contains(',') {
        return None;
    }
    let column = columns
        .trim()
        .rsplit_once('.')
        .map(|(_, column)| column)
        .unwrap_or(columns.trim());
    Some(column.to_string())
}

#[async_trait]
impl Adapter for SqliteAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn supports(&self, capability: BackendCapability) -> bool {
        matches!(
            capability,
            BackendCapability::Query
                | BackendCapability::Ordering
                | BackendCapability::Grouping
                | BackendCapability::Streaming
                | BackendCapability::AlterTable
        )
    }

    async fn get_schemas(&self) -> StorageResult<SchemaSnapshot> {
        let conn = self.connection()?;
        schema::introspect(&conn)
    }

    async fn create_table(&self, schema: &ModelSchema) -> StorageResult<()> {
        self.execute_ddl(&self.statements(schema).create_table())
    }

    async fn add_column(&self, schema: &ModelSchema, column: &str) -> StorageResult<()> {
        self.execute_ddl(&self.statements(schema).add_column(column)?)
    }

    async fn create_index(
        &self,
        schema: &ModelSchema,
        name: &str,
        index: &IndexDescriptor,
    ) -> StorageResult<()> {
        self.execute_ddl(&self.statements(schema).create_index(name, index)?)
    }

    async fn create_foreign_key(
        &self,
        _schema: &ModelSchema,
        _column: &str,
        _parent: &ModelSchema,
        _action: IntegrityAction,
    ) -> StorageResult<()> {
        Err(StorageError::Backend(BackendError::UnsupportedCapability {
            backend_name: BACKEND_NAME.to_string(),
            capability: BackendCapability::NativeIntegrity.to_string(),
        }))
    }

    async fn drop_table(&self, schema: &ModelSchema) -> StorageResult<()> {
        self.execute_ddl(&self.statements(schema).drop_table())
    }

    async fn create(&self, schema: &ModelSchema, record: &Record) -> StorageResult<Value> {
        let insert = self.statements(schema).insert(record)?;
        let conn = self.connection()?;
        execute(&conn, &insert)?;
        Ok(Value::from(conn.last_insert_rowid()))
    }

    async fn create_bulk(
        &self,
        schema: &ModelSchema,
        records: &[Record],
    ) -> StorageResult<Vec<Value>> {
        let statements = self.statements(schema);
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            execute(&tx, &statements.insert(record)?)?;
            ids.push(Value::from(tx.last_insert_rowid()));
        }
        tx.commit()?;
        Ok(ids)
    }

    async fn update(&self, schema: &ModelSchema, record: &Record) -> StorageResult<()> {
        let update = self.statements(schema).update(record)?;
        let conn = self.connection()?;
        if execute(&conn, &update)? == 0 {
            return Err(ResourceError::NotFound.into());
        }
        Ok(())
    }

    async fn update_partial(
        &self,
        schema: &ModelSchema,
        update: &UpdateSpec,
        condition: &Condition,
    ) -> StorageResult<u64> {
        let statement = self.statements(schema).update_partial(update, condition)?;
        let conn = self.connection()?;
        Ok(execute(&conn, &statement)? as u64)
    }

    async fn find_by_id(&self, schema: &ModelSchema, id: &Value) -> StorageResult<Record> {
        let plan = self.statements(schema).select_by_id(id)?;
        let conn = self.connection()?;
        query(&conn, &plan)?
            .into_iter()
            .next()
            .ok_or_else(|| ResourceError::NotFound.into())
    }

    async fn find(&self, schema: &ModelSchema, query_spec: &Query) -> StorageResult<Vec<Record>> {
        let plan = self.statements(schema).select(query_spec)?;
        let conn = self.connection()?;
        query(&conn, &plan)
    }

    async fn stream(&self, schema: Arc<ModelSchema>, query: Query) -> StorageResult<RecordStream> {
        // compile errors surface here rather than as the first stream item
        let plan = self.statements(&schema).select(&query)?;

        let conn = self.connection()?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::task::spawn_blocking(move || {
            // a failed send means the consumer dropped the stream
            let result = query_each(&conn, &plan, |record| tx.blocking_send(Ok(record)).is_ok());
            if let Err(err) = result {
                let _ = tx.blocking_send(Err(err));
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn count(&self, schema: &ModelSchema, condition: &Condition) -> StorageResult<u64> {
        let statement = self.statements(schema).count(condition)?;
        tracing::debug!(sql = %statement.sql, params = statement.params.len(), "sqlite count");
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(&statement.sql)?;
        let count: i64 =
            stmt.query_row(params_from_iter(statement.params.iter()), |row| row.get(0))?;
        Ok(count as u64)
    }

    async fn delete(&self, schema: &ModelSchema, condition: &Condition) -> StorageResult<u64> {
        let statement = self.statements(schema).delete(condition)?;
        let conn = self.connection()?;
        Ok(execute(&conn, &statement)? as u64)
    }
}
