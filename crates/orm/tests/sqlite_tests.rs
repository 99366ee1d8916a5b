//! SQLite adapter integration tests.
//!
//! Every test opens its own in-memory database; the file-backed tests use a
//! temporary directory.
//!
//! Run with: `cargo test -p strata-orm --test sqlite_tests`

#![cfg(feature = "sqlite")]

mod common;

use serde_json::json;

use strata_orm::Connection;
use strata_orm::backends::sqlite::{SqliteAdapter, SqliteConfig};
use strata_orm::condition::{Condition, Query};
use strata_orm::core::{Adapter, AdapterSettings, BackendCapability, BackendKind};
use strata_orm::schema::ModelSchema;
use strata_orm::types::Property;

use common::scenarios;
use common::{person, record, unique_suffix};

fn connection() -> Connection {
    Connection::new(SqliteAdapter::in_memory().expect("in-memory sqlite"))
}

macro_rules! sqlite_scenarios {
    ($($name:ident),* $(,)?) => {
        $(
            #[tokio::test]
            async fn $name() {
                scenarios::$name(&connection(), &unique_suffix()).await;
            }
        )*
    };
}

sqlite_scenarios!(
    conjunction_forms_agree,
    double_negation_keeps_nulls,
    contains_any_needle,
    regex_follows_capability,
    unknown_names_fail,
    unique_index_over_duplicates,
    unique_column_rejects_duplicates,
    values_round_trip,
    sync_is_idempotent,
    cascade_delete,
    cascade_restrict,
    cascade_nullify,
    archive_before_delete,
    updates_and_upserts,
    query_options,
);

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_sqlite_config_defaults() {
    let config = SqliteConfig::default();
    assert_eq!(config.path, ":memory:");
    assert_eq!(config.max_connections, 10);
    assert_eq!(config.busy_timeout_ms, 5000);
    assert!(config.enable_wal);
}

#[test]
fn test_sqlite_config_from_settings() {
    let settings = AdapterSettings::new("/tmp/app.db").with_pool_size(3);
    let config = SqliteConfig::from(&settings);
    assert_eq!(config.path, "/tmp/app.db");
    assert_eq!(config.max_connections, 3);
}

#[test]
fn test_sqlite_capabilities() {
    let adapter = SqliteAdapter::in_memory().unwrap();
    assert_eq!(adapter.kind(), BackendKind::Sqlite);
    assert!(adapter.supports(BackendCapability::Query));
    assert!(adapter.supports(BackendCapability::AlterTable));
    assert!(!adapter.supports(BackendCapability::NativeIntegrity));
}

// ============================================================================
// Backend-specific behavior
// ============================================================================

#[tokio::test]
async fn test_in_memory_databases_are_isolated() {
    let first = connection();
    let second = connection();
    let suffix = unique_suffix();
    first.define_model(person(&suffix)).unwrap();
    second.define_model(person(&suffix)).unwrap();

    first
        .create("Person", record(json!({"name": "Bill Smith"})))
        .await
        .unwrap();
    assert_eq!(first.count("Person", &Condition::all()).await.unwrap(), 1);
    assert_eq!(second.count("Person", &Condition::all()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strata.db");

    {
        let connection = Connection::new(SqliteAdapter::open(&path).unwrap());
        connection.define_model(person("file")).unwrap();
        connection
            .create("Person", record(json!({"name": "Bill Smith", "age": 27})))
            .await
            .unwrap();
    }

    let reopened = Connection::new(SqliteAdapter::open(&path).unwrap());
    reopened.define_model(person("file")).unwrap();
    let report = reopened.sync().await.unwrap();
    assert_eq!(report.tables_created, 0);

    let found = reopened
        .find("Person", &Query::filter(Condition::eq("name", json!("Bill Smith"))))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["age"].as_f64(), Some(27.0));
}

#[tokio::test]
async fn test_missing_table_is_reported() {
    let adapter = SqliteAdapter::in_memory().unwrap();
    let schema = ModelSchema::new("Ghost");
    let err = adapter.count(&schema, &Condition::all()).await.unwrap_err();
    assert_eq!(err.to_string(), "table does not exist");
}

#[tokio::test]
async fn test_required_columns_checked_before_insert() {
    let connection = connection();
    let mut user = ModelSchema::new("User");
    user.add_column("name", Property::string().required()).unwrap();
    user.add_column("age", Property::integer().required()).unwrap();
    connection.define_model(user).unwrap();

    let err = connection
        .create("User", record(json!({})))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "'name' is required,'age' is required");
    assert_eq!(connection.count("User", &Condition::all()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_drop_all_models_recreates_on_next_use() {
    let connection = connection();
    let suffix = unique_suffix();
    connection.define_model(person(&suffix)).unwrap();
    connection
        .create("Person", record(json!({"name": "Bill Smith"})))
        .await
        .unwrap();

    connection.drop_all_models().await.unwrap();
    let snapshot = connection.adapter().get_schemas().await.unwrap();
    assert!(snapshot.tables.is_empty());

    assert_eq!(connection.count("Person", &Condition::all()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_drop_model_recreates_empty_table() {
    let connection = connection();
    let suffix = unique_suffix();
    connection.define_model(person(&suffix)).unwrap();
    connection
        .create("Person", record(json!({"name": "Bill Smith"})))
        .await
        .unwrap();

    connection.drop_model("Person").await.unwrap();
    let table = connection.model("Person").unwrap().table_name().to_string();
    let snapshot = connection.adapter().get_schemas().await.unwrap();
    assert!(snapshot.table(&table).is_none());

    assert_eq!(connection.count("Person", &Condition::all()).await.unwrap(), 0);
    connection
        .create("Person", record(json!({"name": "Daniel Smith"})))
        .await
        .unwrap();
    assert_eq!(connection.count("Person", &Condition::all()).await.unwrap(), 1);
}
