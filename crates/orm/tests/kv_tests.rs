//! Key-value adapter integration tests.
//!
//! The key-value backend answers only identifier lookups, so these tests
//! cover what it can do through a connection and check that everything else
//! fails loudly instead of being ignored.

mod common;

use serde_json::json;

use strata_orm::Connection;
use strata_orm::backends::kv::{KvAdapter, KvConfig, MemoryStore};
use strata_orm::condition::{Condition, Query, UpdateSpec};
use strata_orm::core::{Adapter, BackendCapability, Upserted};
use strata_orm::schema::{
    ARCHIVE_MODEL, BelongsToOptions, HasManyOptions, IndexDescriptor, IntegrityAction,
};
use strata_orm::types::Property;

use common::{person, record, unique_suffix};

fn connection() -> Connection {
    Connection::new(KvAdapter::in_memory())
}

#[tokio::test]
async fn test_crud_by_id() {
    let connection = connection();
    connection.define_model(person(&unique_suffix())).unwrap();

    let bill = connection
        .create("Person", record(json!({"name": "Bill Smith", "age": "27"})))
        .await
        .unwrap();
    assert_eq!(bill["age"].as_f64(), Some(27.0));

    let found = connection.find_by_id("Person", &bill["id"]).await.unwrap();
    assert_eq!(found["name"], json!("Bill Smith"));

    let mut renamed = found.clone();
    renamed.insert("name".to_string(), json!("William Smith"));
    connection.update("Person", renamed).await.unwrap();
    let found = connection.find_by_id("Person", &bill["id"]).await.unwrap();
    assert_eq!(found["name"], json!("William Smith"));

    assert!(connection.delete_by_id("Person", &bill["id"]).await.unwrap());
    assert!(!connection.delete_by_id("Person", &bill["id"]).await.unwrap());
    assert!(
        connection
            .find_by_id("Person", &bill["id"])
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn test_membership_on_ids_and_paging() {
    let connection = connection();
    connection.define_model(person(&unique_suffix())).unwrap();
    let mut ids = Vec::new();
    for name in ["Bill Smith", "Daniel Smith", "John Doe"] {
        let created = connection
            .create("Person", record(json!({"name": name})))
            .await
            .unwrap();
        ids.push(created["id"].clone());
    }

    let chosen = Condition::is_in("id", vec![ids[0].clone(), ids[2].clone()]);
    assert_eq!(connection.count("Person", &chosen).await.unwrap(), 2);

    let page = connection
        .find("Person", &Query::new().skip(1).limit(1))
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["name"], json!("Daniel Smith"));
}

#[tokio::test]
async fn test_condition_gaps_are_errors() {
    let connection = connection();
    connection.define_model(person(&unique_suffix())).unwrap();
    connection
        .create("Person", record(json!({"name": "Bill Smith"})))
        .await
        .unwrap();

    let by_name = Query::filter(Condition::eq("name", json!("Bill Smith")));
    let err = connection.find("Person", &by_name).await.unwrap_err();
    assert!(err.to_string().contains("not supported by key-value"), "{}", err);

    let err = connection
        .find("Person", &Query::new().order("name"))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "capability 'ordering' not supported by key-value"
    );
    assert!(!connection.adapter().supports(BackendCapability::Query));
}

#[tokio::test]
async fn test_upsert_by_id_applies_defaults_and_increments() {
    let connection = connection();
    let mut counter = common::model("Counter", &unique_suffix());
    counter.add_column("hits", Property::integer()).unwrap();
    counter
        .add_column("label", Property::string().default_value(json!("counter")))
        .unwrap();
    connection.define_model(counter).unwrap();

    let created = connection
        .upsert(
            "Counter",
            &UpdateSpec::new().inc("hits", 1),
            &Condition::id(json!(7)),
        )
        .await
        .unwrap();
    assert_eq!(created, Upserted::Created(json!(7)));

    let updated = connection
        .upsert(
            "Counter",
            &UpdateSpec::new().inc("hits", 2),
            &Condition::id(json!(7)),
        )
        .await
        .unwrap();
    assert_eq!(updated, Upserted::Updated(1));
    let stored = connection.find_by_id("Counter", &json!(7)).await.unwrap();
    assert_eq!(stored["hits"].as_i64(), Some(3));
    assert_eq!(stored["label"], json!("counter"));
}

#[tokio::test]
async fn test_unique_indexes_are_recorded_not_enforced() {
    let connection = connection();
    connection.define_model(person(&unique_suffix())).unwrap();
    connection
        .registry()
        .add_index("Person", IndexDescriptor::on("name").unique())
        .unwrap();

    let report = connection.sync().await.unwrap();
    assert_eq!(report.indexes_created, 1);
    assert!(connection.sync().await.unwrap().is_empty());

    for _ in 0..2 {
        connection
            .create("Person", record(json!({"name": "Bill Smith"})))
            .await
            .unwrap();
    }
    assert_eq!(connection.count("Person", &Condition::all()).await.unwrap(), 2);
}

#[tokio::test]
async fn test_archive_without_integrity_rules() {
    let connection = connection();
    let mut memo = common::model("Memo", &unique_suffix()).with_archive();
    memo.add_column("text", Property::string()).unwrap();
    connection.define_model(memo).unwrap();

    let created = connection
        .create("Memo", record(json!({"text": "archive me"})))
        .await
        .unwrap();
    assert!(connection.delete_by_id("Memo", &created["id"]).await.unwrap());

    let archived = connection.find(ARCHIVE_MODEL, &Query::new()).await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0]["model"], json!("Memo"));
    assert_eq!(archived[0]["data"]["text"], json!("archive me"));
}

#[tokio::test]
async fn test_integrity_rules_surface_capability_gap() {
    let connection = connection();
    let suffix = unique_suffix();
    connection.define_model(common::user(&suffix)).unwrap();
    connection.define_model(common::model("Post", &suffix)).unwrap();
    connection
        .registry()
        .has_many(
            "User",
            "Post",
            HasManyOptions::default().integrity(IntegrityAction::Delete),
        )
        .unwrap();

    let bill = connection
        .create("User", record(json!({"name": "Bill"})))
        .await
        .unwrap();
    let err = connection
        .delete_by_id("User", &bill["id"])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not supported by key-value"), "{}", err);
    assert!(connection.find_by_id("User", &bill["id"]).await.is_ok());
}

#[tokio::test]
async fn test_belongs_to_loads_through_key_lookup() {
    let connection = connection();
    let suffix = unique_suffix();
    connection.define_model(common::user(&suffix)).unwrap();
    connection.define_model(common::model("Post", &suffix)).unwrap();
    connection
        .registry()
        .belongs_to("Post", "User", BelongsToOptions::default())
        .unwrap();

    let bill = connection
        .create("User", record(json!({"name": "Bill"})))
        .await
        .unwrap();
    let post = connection
        .create("Post", record(json!({"user_id": bill["id"].clone()})))
        .await
        .unwrap();
    let orphan = connection
        .create("Post", record(json!({})))
        .await
        .unwrap();

    let owner = connection.load("Post", &post, "user").await.unwrap();
    assert_eq!(owner.to_value()["name"], json!("Bill"));
    let nobody = connection.load("Post", &orphan, "user").await.unwrap();
    assert!(nobody.to_value().is_null());
}

#[tokio::test]
async fn test_prefixed_keyspace_on_shared_store() {
    let store = std::sync::Arc::new(MemoryStore::new());
    let first = KvAdapter::new(
        store.clone(),
        KvConfig {
            prefix: Some("a".to_string()),
        },
    );
    let second = KvAdapter::new(
        store,
        KvConfig {
            prefix: Some("b".to_string()),
        },
    );
    let schema = person("shared");

    first.create_table(&schema).await.unwrap();
    first
        .create(&schema, &record(json!({"name": "Bill Smith"})))
        .await
        .unwrap();

    assert_eq!(first.count(&schema, &Condition::all()).await.unwrap(), 1);
    let err = second.count(&schema, &Condition::all()).await.unwrap_err();
    assert_eq!(err.to_string(), "table does not exist");
}
