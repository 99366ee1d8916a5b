//! PostgreSQL adapter implementation.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use futures::StreamExt;
use postgres_types::{IsNull, ToSql, Type, to_sql_checked};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};

use crate::backends::sql::SqlStatements;
use crate::compiler::sql::{PostgresDialect, SqlFragment, SqlParam};
use crate::condition::{Condition, Query, UpdateSpec};
use crate::core::{Adapter, AdapterSettings, BackendCapability, BackendKind, RecordStream};
use crate::error::{
    BackendError, IntegrityError, ResourceError, StorageError, StorageResult, ValidationError,
};
use crate::schema::{IndexDescriptor, IntegrityAction, ModelSchema, SchemaSnapshot};
use crate::types::Record;

use super::schema;

const BACKEND_NAME: &str = "postgres";

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// PostgreSQL adapter.
pub struct PostgresAdapter {
    pool: Pool,
    config: PostgresConfig,
}

impl Debug for PostgresAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresAdapter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Configuration for the PostgreSQL adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// PostgreSQL host.
    #[serde(default = "default_host")]
    pub host: String,

    /// PostgreSQL port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name.
    #[serde(default = "default_dbname")]
    pub dbname: String,

    /// Database user.
    #[serde(default = "default_user")]
    pub user: String,

    /// Database password.
    #[serde(default)]
    pub password: Option<String>,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Statement timeout in milliseconds.
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_dbname() -> String {
    "strata".to_string()
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> usize {
    10
}

fn default_statement_timeout_ms() -> u64 {
    30000
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dbname: default_dbname(),
            user: default_user(),
            password: None,
            max_connections: default_max_connections(),
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }
}

impl PostgresConfig {
    /// Reads the following environment variables:
    /// - `STRATA_PG_HOST` (default: "localhost")
    /// - `STRATA_PG_PORT` (default: 5432)
    /// - `STRATA_PG_DBNAME` (default: "strata")
    /// - `STRATA_PG_USER` (default: "postgres")
    /// - `STRATA_PG_PASSWORD`
    /// - `STRATA_PG_MAX_CONNECTIONS` (default: 10)
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("STRATA_PG_HOST").unwrap_or_else(|_| default_host()),
            port: std::env::var("STRATA_PG_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(default_port),
            dbname: std::env::var("STRATA_PG_DBNAME").unwrap_or_else(|_| default_dbname()),
            user: std::env::var("STRATA_PG_USER").unwrap_or_else(|_| default_user()),
            password: std::env::var("STRATA_PG_PASSWORD").ok(),
            max_connections: std::env::var("STRATA_PG_MAX_CONNECTIONS")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(default_max_connections),
            ..Default::default()
        }
    }
}

impl From<&AdapterSettings> for PostgresConfig {
    fn from(settings: &AdapterSettings) -> Self {
        let defaults = Self::default();
        Self {
            host: settings.host.clone().unwrap_or(defaults.host),
            port: settings.port.unwrap_or(defaults.port),
            dbname: settings.database.clone(),
            user: settings.user.clone().unwrap_or(defaults.user),
            password: settings.password.clone(),
            max_connections: settings
                .pool_size
                .map(|n| n as usize)
                .unwrap_or(defaults.max_connections),
            statement_timeout_ms: defaults.statement_timeout_ms,
        }
    }
}

fn connection_failed(err: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(BackendError::ConnectionFailed {
        backend_name: BACKEND_NAME.to_string(),
        message: err.to_string(),
    })
}

impl PostgresAdapter {
    /// Creates a new adapter and verifies connectivity.
    pub async fn new(config: PostgresConfig) -> StorageResult<Self> {
        let pool = Self::create_pool(&config)?;

        let client = pool.get().await.map_err(connection_failed)?;
        client.simple_query("SELECT 1").await?;
        drop(client);

        tracing::debug!(host = %config.host, dbname = %config.dbname, "opened postgres pool");

        Ok(Self { pool, config })
    }

    pub async fn from_env() -> StorageResult<Self> {
        Self::new(PostgresConfig::from_env()).await
    }

    pub async fn from_settings(settings: &AdapterSettings) -> StorageResult<Self> {
        Self::new(PostgresConfig::from(settings)).await
    }

    fn create_pool(config: &PostgresConfig) -> StorageResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.dbname.clone());
        cfg.user = Some(config.user.clone());
        cfg.password = config.password.clone();
        cfg.options = Some(format!(
            "-c statement_timeout={}",
            config.statement_timeout_ms
        ));

        cfg.builder(NoTls)
            .map_err(connection_failed)?
            .max_size(config.max_connections)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(connection_failed)
    }

    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    async fn client(&self) -> StorageResult<deadpool_postgres::Client> {
        self.pool.get().await.map_err(connection_failed)
    }

    fn statements<'a>(&self, schema: &'a ModelSchema) -> SqlStatements<'a> {
        SqlStatements::new(&PostgresDialect, schema)
    }

    async fn execute_ddl(&self, sql: &str) -> StorageResult<()> {
        tracing::debug!(sql, "postgres ddl");
        self.client().await?.batch_execute(sql).await?;
        Ok(())
    }

    async fn execute(&self, fragment: &SqlFragment) -> StorageResult<u64> {
        tracing::debug!(sql = %fragment.sql, params = fragment.params.len(), "postgres execute");
        let client = self.client().await?;
        let params = param_refs(fragment);
        Ok(client.execute(fragment.sql.as_str(), &params).await?)
    }

    async fn query_rows(&self, fragment: &SqlFragment) -> StorageResult<Vec<Row>> {
        tracing::debug!(sql = %fragment.sql, params = fragment.params.len(), "postgres query");
        let client = self.client().await?;
        let params = param_refs(fragment);
        Ok(client.query(fragment.sql.as_str(), &params).await?)
    }
}

fn param_refs(fragment: &SqlFragment) -> Vec<&(dyn ToSql + Sync)> {
    fragment
        .params
        .iter()
        .map(|p| p as &(dyn ToSql + Sync))
        .collect()
}

fn returning_id(mut insert: SqlFragment) -> SqlFragment {
    insert.sql.push_str(" RETURNING \"id\"");
    insert
}

fn read_id(row: &Row) -> StorageResult<Value> {
    Ok(Value::from(row.try_get::<_, i64>(0)?))
}

/// Reads every column of a row according to its declared type.
fn read_row(row: &Row) -> StorageResult<Vec<SqlParam>> {
    let mut values = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(i)?.map(SqlParam::Bool)
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(i)?
                .map(|n| SqlParam::Integer(n as i64))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(i)?
                .map(|n| SqlParam::Integer(n as i64))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(i)?.map(SqlParam::Integer)
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(i)?
                .map(|f| SqlParam::Float(f as f64))
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(i)?.map(SqlParam::Float)
        } else if *ty == Type::TIMESTAMPTZ {
            row.try_get::<_, Option<DateTime<Utc>>>(i)?
                .map(SqlParam::Timestamp)
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<NaiveDateTime>>(i)?
                .map(|dt| SqlParam::Timestamp(dt.and_utc()))
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            row.try_get::<_, Option<Value>>(i)?.map(SqlParam::Json)
        } else {
            row.try_get::<_, Option<String>>(i)?.map(SqlParam::Text)
        };
        values.push(value.unwrap_or(SqlParam::Null));
    }
    Ok(values)
}

fn is_text(ty: &Type) -> bool {
    *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR
}

/// Binds by the type the server expects, so one parameter enum serves every column.
impl ToSql for SqlParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            SqlParam::Null => Ok(IsNull::Yes),
            SqlParam::Bool(b) => b.to_sql(ty, out),
            SqlParam::Integer(n) => {
                if *ty == Type::INT2 {
                    i16::try_from(*n)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*n)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*n as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*n as f64).to_sql(ty, out)
                } else if is_text(ty) {
                    n.to_string().to_sql(ty, out)
                } else {
                    n.to_sql(ty, out)
                }
            }
            SqlParam::Float(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else if *ty == Type::INT8 {
                    (*f as i64).to_sql(ty, out)
                } else if is_text(ty) {
                    f.to_string().to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            SqlParam::Text(s) => {
                if *ty == Type::INT8 {
                    s.parse::<i64>()?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    s.parse::<i32>()?.to_sql(ty, out)
                } else if *ty == Type::JSON || *ty == Type::JSONB {
                    Value::String(s.clone()).to_sql(ty, out)
                } else {
                    s.as_str().to_sql(ty, out)
                }
            }
            SqlParam::Timestamp(dt) => {
                if *ty == Type::TIMESTAMP {
                    dt.naive_utc().to_sql(ty, out)
                } else if is_text(ty) {
                    dt.to_rfc3339().to_sql(ty, out)
                } else {
                    dt.to_sql(ty, out)
                }
            }
            SqlParam::Json(value) => {
                if is_text(ty) {
                    value.to_string().to_sql(ty, out)
                } else {
                    value.to_sql(ty, out)
                }
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Maps a driver error onto the error taxonomy by SQLSTATE.
pub(crate) fn map_error(err: tokio_postgres::Error) -> StorageError {
    if let Some(db) = err.as_db_error() {
        let code = db.code();
        if *code == SqlState::UNIQUE_VIOLATION {
            return IntegrityError::Duplicated {
                column: db.detail().and_then(key_column),
            }
            .into();
        }
        if *code == SqlState::NOT_NULL_VIOLATION {
            let column = db.column().unwrap_or_default().to_string();
            return ValidationError::Required(column).into();
        }
        if *code == SqlState::FOREIGN_KEY_VIOLATION {
            return IntegrityError::Rejected.into();
        }
        if *code == SqlState::UNDEFINED_TABLE {
            return ResourceError::TableDoesNotExist.into();
        }
    }
    StorageError::unknown(BACKEND_NAME, err)
}

/// The single column in a detail like `Key (age)=(27) already exists.`
fn key_column(detail: &str) -> Option<String> {
    let pattern = regex::Regex::new(r"^Key \(([^)]+)\)=").ok()?;
    let columns = pattern.captures(detail)?.get(1)?.as_str();
    if columns.contains(',') {
        return None;
    }
    Some(columns.trim().trim_matches('"').to_string())
}

#[async_trait]
impl Adapter for PostgresAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn supports(&self, _capability: BackendCapability) -> bool {
        true
    }

    async fn get_schemas(&self) -> StorageResult<SchemaSnapshot> {
        let client = self.client().await?;
        schema::introspect(&client).await
    }

    async fn create_table(&self, schema: &ModelSchema) -> StorageResult<()> {
        self.execute_ddl(&self.statements(schema).create_table())
            .await
    }

    async fn add_column(&self, schema: &ModelSchema, column: &str) -> StorageResult<()> {
        self.execute_ddl(&self.statements(schema).add_column(column)?)
            .await
    }

    async fn create_index(
        &self,
        schema: &ModelSchema,
        name: &str,
        index: &IndexDescriptor,
    ) -> StorageResult<()> {
        self.execute_ddl(&self.statements(schema).create_index(name, index)?)
            .await
    }

    async fn create_foreign_key(
        &self,
        schema: &ModelSchema,
        column: &str,
        parent: &ModelSchema,
        action: IntegrityAction,
    ) -> StorageResult<()> {
        let sql = self
            .statements(schema)
            .create_foreign_key(column, parent, action)?;
        self.execute_ddl(&sql).await
    }

    async fn drop_table(&self, schema: &ModelSchema) -> StorageResult<()> {
        let sql = format!("{} CASCADE", self.statements(schema).drop_table());
        self.execute_ddl(&sql).await
    }

    async fn create(&self, schema: &ModelSchema, record: &Record) -> StorageResult<Value> {
        let insert = returning_id(self.statements(schema).insert(record)?);
        let rows = self.query_rows(&insert).await?;
        let row = rows
            .first()
            .ok_or_else(|| StorageError::unexpected("insert returned no id"))?;
        read_id(row)
    }

    async fn create_bulk(
        &self,
        schema: &ModelSchema,
        records: &[Record],
    ) -> StorageResult<Vec<Value>> {
        let statements = self.statements(schema);
        let mut client = self.client().await?;
        let tx = client.transaction().await?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let insert = returning_id(statements.insert(record)?);
            let params = param_refs(&insert);
            let row = tx.query_one(insert.sql.as_str(), &params).await?;
            ids.push(read_id(&row)?);
        }
        tx.commit().await?;
        Ok(ids)
    }

    async fn update(&self, schema: &ModelSchema, record: &Record) -> StorageResult<()> {
        let update = self.statements(schema).update(record)?;
        if self.execute(&update).await? == 0 {
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
        self.execute(&statement).await
    }

    async fn find_by_id(&self, schema: &ModelSchema, id: &Value) -> StorageResult<Record> {
        let plan = self.statements(schema).select_by_id(id)?;
        let rows = self.query_rows(&plan.statement).await?;
        let row = rows.first().ok_or(ResourceError::NotFound)?;
        plan.record(read_row(row)?)
    }

    async fn find(&self, schema: &ModelSchema, query: &Query) -> StorageResult<Vec<Record>> {
        let plan = self.statements(schema).select(query)?;
        self.query_rows(&plan.statement)
            .await?
            .iter()
            .map(|row| plan.record(read_row(row)?))
            .collect()
    }

    async fn stream(&self, schema: Arc<ModelSchema>, query: Query) -> StorageResult<RecordStream> {
        let plan = self.statements(&schema).select(&query)?;
        tracing::debug!(sql = %plan.statement.sql, "postgres stream");

        let client = self.client().await?;
        let rows = client
            .query_raw(plan.statement.sql.as_str(), plan.statement.params.iter())
            .await?;

        // the pooled client must outlive the portal
        let stream = rows.map(move |row| {
            let _client = &client;
            let row = row?;
            plan.record(read_row(&row)?)
        });
        Ok(Box::pin(stream))
    }

    async fn count(&self, schema: &ModelSchema, condition: &Condition) -> StorageResult<u64> {
        let statement = self.statements(schema).count(condition)?;
        let rows = self.query_rows(&statement).await?;
        let row = rows
            .first()
            .ok_or_else(|| StorageError::unexpected("count returned no row"))?;
        Ok(row.try_get::<_, i64>(0)? as u64)
    }

    async fn delete(&self, schema: &ModelSchema, condition: &Condition) -> StorageResult<u64> {
        let statement = self.statements(schema).delete(condition)?;
        self.execute(&statement).await
    }
}
