//! Behavior every query-capable backend must share.
//!
//! Each scenario takes a fresh [`Connection`] and a table suffix, defines
//! its own models and asserts on what the backend returns. Backend suites
//! call them from thin `#[tokio::test]` wrappers.

use std::collections::{HashMap, HashSet};

use futures::TryStreamExt;
use regex::Regex;
use serde_json::{Value, json};

use strata_orm::condition::{Aggregate, Condition, GroupSpec, Query, UpdateSpec};
use strata_orm::core::{BackendCapability, Upserted};
use strata_orm::schema::{ARCHIVE_MODEL, HasManyOptions, IndexDescriptor, IntegrityAction};
use strata_orm::sync::Synchronizer;
use strata_orm::types::{Property, Record};
use strata_orm::Connection;

use super::fixtures::{model, people, person, record, sample, user};

/// Names of the given records, for order-independent comparison.
pub fn names(records: &[Record]) -> HashSet<String> {
    records
        .iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
        .collect()
}

async fn seed_people(connection: &Connection, suffix: &str) {
    connection.define_model(person(suffix)).unwrap();
    connection.create_bulk("Person", people()).await.unwrap();
}

async fn find_names(connection: &Connection, condition: Value) -> HashSet<String> {
    let condition = Condition::parse(&condition).unwrap();
    names(
        &connection
            .find("Person", &Query::filter(condition))
            .await
            .unwrap(),
    )
}

/// `$and`, a bare list and a merged object select the same rows.
pub async fn conjunction_forms_agree(connection: &Connection, suffix: &str) {
    seed_people(connection, suffix).await;
    let name = json!({"name": {"$contains": "smith"}});
    let age = json!({"age": {"$gt": 30}});

    let explicit = find_names(connection, json!({"$and": [name, age]})).await;
    let listed = find_names(connection, json!([name, age])).await;
    let merged = find_names(
        connection,
        json!({"name": {"$contains": "smith"}, "age": {"$gt": 30}}),
    )
    .await;

    let expected: HashSet<String> = ["Daniel Smith".to_string()].into_iter().collect();
    assert_eq!(explicit, expected);
    assert_eq!(listed, expected);
    assert_eq!(merged, expected);

    let either = find_names(connection, json!({"$or": [name, {"city": "Oslo"}]})).await;
    assert_eq!(either.len(), 4);
}

/// Double negation also selects rows where the column is null.
pub async fn double_negation_keeps_nulls(connection: &Connection, suffix: &str) {
    seed_people(connection, suffix).await;
    let positive = find_names(connection, json!({"age": 27})).await;
    let doubled = find_names(connection, json!({"age": {"$not": {"$not": 27}}})).await;

    assert_eq!(positive, ["Bill Smith".to_string()].into_iter().collect());
    assert!(doubled.is_superset(&positive));
    assert!(doubled.len() > positive.len());
    assert!(doubled.contains("Gina Baker"));

    let negated = find_names(connection, json!({"age": {"$not": 27}})).await;
    assert!(negated.contains("Gina Baker"));
    assert!(!negated.contains("Bill Smith"));
}

/// `$contains` with several needles matches any of them, ignoring case.
pub async fn contains_any_needle(connection: &Connection, suffix: &str) {
    seed_people(connection, suffix).await;
    let found = find_names(connection, json!({"name": {"$contains": ["smi", "doe"]}})).await;
    let expected: HashSet<String> = ["Bill Smith", "Daniel Smith", "John Doe"]
        .into_iter()
        .map(str::to_string)
        .collect();
    assert_eq!(found, expected);

    assert_eq!(
        find_names(connection, json!({"name": {"$startswith": "gina"}})).await,
        ["Gina Baker".to_string()].into_iter().collect()
    );
    assert_eq!(
        find_names(connection, json!({"name": {"$endswith": "DOE"}})).await,
        ["John Doe".to_string()].into_iter().collect()
    );
    assert!(find_names(connection, json!({"name": []})).await.is_empty());
}

/// Regex leaves run where the backend has a regex operator and fail
/// with a capability error elsewhere.
pub async fn regex_follows_capability(connection: &Connection, suffix: &str) {
    seed_people(connection, suffix).await;
    let condition = Condition::parse(&json!({"name": {"$regex": "^j"}}));
    let result = match condition {
        Ok(condition) => connection.find("Person", &Query::filter(condition)).await,
        Err(err) => Err(err),
    };
    if connection.adapter().supports(BackendCapability::RegexMatch) {
        assert!(result.unwrap().is_empty(), "regex leaves are case-sensitive");
        let insensitive = find_names(
            connection,
            json!({"name": {"$regex": {"pattern": "^j", "flags": "i"}}}),
        )
        .await;
        assert_eq!(insensitive, ["John Doe".to_string()].into_iter().collect());
    } else {
        let err = result.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "capability 'regex-match' not supported by {}",
                connection.adapter().name()
            )
        );
    }
}

/// Unknown columns and operators are compile errors.
pub async fn unknown_names_fail(connection: &Connection, suffix: &str) {
    seed_people(connection, suffix).await;
    let err = connection
        .find(
            "Person",
            &Query::filter(Condition::parse(&json!({"agee": 27})).unwrap()),
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "unknown column 'agee'");

    let err = Condition::parse(&json!({"age": {"$near": 27}})).unwrap_err();
    assert_eq!(err.to_string(), "unknown operator '$near'");
}

/// A unique index added over duplicate rows still rejects new duplicates.
pub async fn unique_index_over_duplicates(connection: &Connection, suffix: &str) {
    connection.define_model(user(suffix)).unwrap();
    for name in ["Bill", "Gina"] {
        connection
            .create("User", record(json!({"name": name, "age": 27})))
            .await
            .unwrap();
    }

    connection
        .registry()
        .add_index("User", IndexDescriptor::on("age").unique())
        .unwrap();
    connection.sync().await.unwrap();

    let err = connection
        .create("User", record(json!({"name": "John", "age": 27})))
        .await
        .unwrap_err();
    assert!(err.is_duplicated());
    let pattern = Regex::new("^duplicated( age)?$").unwrap();
    assert!(pattern.is_match(&err.to_string()), "{}", err);

    assert_eq!(connection.count("User", &Condition::all()).await.unwrap(), 2);
    let john = connection
        .create("User", record(json!({"name": "John", "age": 28})))
        .await
        .unwrap();

    let to_john = Condition::eq("name", json!("John"));
    let err = connection
        .update_where("User", &UpdateSpec::new().set("age", json!(27)), &to_john)
        .await
        .unwrap_err();
    assert!(pattern.is_match(&err.to_string()), "{}", err);

    let mut replaced = john.clone();
    replaced.insert("age".to_string(), json!(27));
    let err = connection.update("User", replaced).await.unwrap_err();
    assert!(pattern.is_match(&err.to_string()), "{}", err);

    let err = connection
        .upsert(
            "User",
            &UpdateSpec::new().set("age", json!(27)),
            &Condition::eq("name", json!("Zed")),
        )
        .await
        .unwrap_err();
    assert!(pattern.is_match(&err.to_string()), "{}", err);

    // rewriting a record's own value is not a collision
    let mut renamed = john.clone();
    renamed.insert("name".to_string(), json!("Johnny"));
    connection.update("User", renamed).await.unwrap();
    let updated = connection
        .update_where(
            "User",
            &UpdateSpec::new().set("age", json!(29)),
            &Condition::eq("name", json!("Johnny")),
        )
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let twenty_seven = Condition::eq("age", json!(27));
    assert_eq!(connection.count("User", &twenty_seven).await.unwrap(), 2);
    assert_eq!(connection.count("User", &Condition::all()).await.unwrap(), 3);
}

/// Declared uniqueness is enforced on insert.
pub async fn unique_column_rejects_duplicates(connection: &Connection, suffix: &str) {
    let mut account = model("Account", suffix);
    account
        .add_column("email", Property::string().unique())
        .unwrap();
    connection.define_model(account).unwrap();

    connection
        .create("Account", record(json!({"email": "bill@example.com"})))
        .await
        .unwrap();
    let err = connection
        .create("Account", record(json!({"email": "bill@example.com"})))
        .await
        .unwrap_err();
    assert!(err.is_duplicated(), "{}", err);
}

/// Every portable value kind survives a write and a read.
pub async fn values_round_trip(connection: &Connection, suffix: &str) {
    connection.define_model(sample(suffix)).unwrap();
    let created = connection
        .create(
            "Sample",
            record(json!({
                "label": "first",
                "body": "a longer body of text",
                "ratio": 0.25,
                "count": 42,
                "enabled": true,
                "seen_at": "2024-03-01T10:20:30.123Z",
                "meta": {"tags": ["a", "b"], "level": 2},
                "address": {"city": "Paris"}
            })),
        )
        .await
        .unwrap();

    let stored = connection
        .find_by_id("Sample", &created["id"])
        .await
        .unwrap();
    assert_eq!(stored["label"], json!("first"));
    assert_eq!(stored["body"], json!("a longer body of text"));
    assert_eq!(stored["ratio"].as_f64(), Some(0.25));
    assert_eq!(stored["count"].as_i64(), Some(42));
    assert_eq!(stored["enabled"], json!(true));
    assert_eq!(stored["seen_at"], json!("2024-03-01T10:20:30.123Z"));
    assert_eq!(stored["meta"], json!({"tags": ["a", "b"], "level": 2}));
    assert_eq!(stored["address"]["city"], json!("Paris"));

    let nested = connection
        .find(
            "Sample",
            &Query::filter(Condition::parse(&json!({"address": {"city": "Paris"}})).unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(nested.len(), 1);
}

/// A second pass over an unchanged registry issues nothing.
pub async fn sync_is_idempotent(connection: &Connection, suffix: &str) {
    define_blog(connection, suffix, IntegrityAction::Nullify);
    let mut user = connection.model("User").unwrap().as_ref().clone();
    user.add_column("email", Property::string().unique()).unwrap();
    connection.define_model(user).unwrap();

    let synchronizer = Synchronizer::new();
    let registry = connection.registry();
    let adapter = connection.adapter().as_ref();

    let first = synchronizer.run(registry, adapter).await.unwrap();
    assert_eq!(first.tables_created, 2);
    assert_eq!(first.indexes_created, 1);

    let second = synchronizer.run(registry, adapter).await.unwrap();
    assert!(second.is_empty(), "{:?}", second);

    registry
        .add_column("Post", "published", Property::boolean())
        .unwrap();
    let third = synchronizer.run(registry, adapter).await.unwrap();
    assert_eq!(third.columns_added, 1);
    assert_eq!(third.operations(), 1);
}

fn define_blog(connection: &Connection, suffix: &str, action: IntegrityAction) {
    connection.define_model(user(suffix)).unwrap();
    let mut post = model("Post", suffix);
    post.add_column("title", Property::string()).unwrap();
    connection.define_model(post).unwrap();
    connection
        .registry()
        .has_many("User", "Post", HasManyOptions::default().integrity(action))
        .unwrap();
}

async fn seed_blog(connection: &Connection) -> (Record, Record) {
    let bill = connection
        .create("User", record(json!({"name": "Bill"})))
        .await
        .unwrap();
    let gina = connection
        .create("User", record(json!({"name": "Gina"})))
        .await
        .unwrap();
    for (owner, title) in [(&bill, "first"), (&bill, "second"), (&gina, "third")] {
        connection
            .create(
                "Post",
                record(json!({"title": title, "user_id": owner["id"].clone()})),
            )
            .await
            .unwrap();
    }
    (bill, gina)
}

fn titles(records: &[Record]) -> HashSet<String> {
    records
        .iter()
        .filter_map(|r| r.get("title").and_then(Value::as_str).map(str::to_string))
        .collect()
}

/// `delete` removes exactly the referencing children.
pub async fn cascade_delete(connection: &Connection, suffix: &str) {
    define_blog(connection, suffix, IntegrityAction::Delete);
    let (bill, _) = seed_blog(connection).await;

    assert!(connection.delete_by_id("User", &bill["id"]).await.unwrap());

    let remaining = connection.find("Post", &Query::new()).await.unwrap();
    assert_eq!(titles(&remaining), ["third".to_string()].into_iter().collect());
    assert_eq!(connection.count("User", &Condition::all()).await.unwrap(), 1);
}

/// `restrict` rejects the delete and leaves both sides intact.
pub async fn cascade_restrict(connection: &Connection, suffix: &str) {
    define_blog(connection, suffix, IntegrityAction::Restrict);
    let (bill, _) = seed_blog(connection).await;

    let err = connection
        .delete("User", &Condition::id(bill["id"].clone()))
        .await
        .unwrap_err();
    assert!(err.is_rejected(), "{}", err);
    assert_eq!(err.to_string(), "rejected");
    assert_eq!(connection.count("User", &Condition::all()).await.unwrap(), 2);
    assert_eq!(connection.count("Post", &Condition::all()).await.unwrap(), 3);

    let unreferenced = connection
        .create("User", record(json!({"name": "John"})))
        .await
        .unwrap();
    assert!(
        connection
            .delete_by_id("User", &unreferenced["id"])
            .await
            .unwrap()
    );
}

/// `nullify` clears the foreign key of the referencing children.
pub async fn cascade_nullify(connection: &Connection, suffix: &str) {
    define_blog(connection, suffix, IntegrityAction::Nullify);
    let (bill, gina) = seed_blog(connection).await;

    connection
        .delete("User", &Condition::id(bill["id"].clone()))
        .await
        .unwrap();

    let posts = connection.find("Post", &Query::new()).await.unwrap();
    assert_eq!(posts.len(), 3);
    let orphans: Vec<&Record> = posts
        .iter()
        .filter(|post| post.get("user_id").is_none_or(Value::is_null))
        .collect();
    assert_eq!(orphans.len(), 2);
    let kept = posts
        .iter()
        .find(|post| post["title"] == json!("third"))
        .unwrap();
    assert_eq!(kept["user_id"], gina["id"]);
}

/// Archived models copy full rows into the archive before deletion.
pub async fn archive_before_delete(connection: &Connection, suffix: &str) {
    let name = format!("Memo{}", suffix);
    let mut memo = model(&name, suffix).with_archive();
    memo.add_column("text", Property::string()).unwrap();
    connection.define_model(memo).unwrap();

    let kept = connection
        .create(&name, record(json!({"text": "keep me"})))
        .await
        .unwrap();
    let dropped = connection
        .create(&name, record(json!({"text": "archive me"})))
        .await
        .unwrap();
    assert!(connection.delete_by_id(&name, &dropped["id"]).await.unwrap());

    let archived: Vec<Record> = connection
        .find(ARCHIVE_MODEL, &Query::new())
        .await
        .unwrap()
        .into_iter()
        .filter(|entry| entry["model"] == json!(name))
        .collect();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0]["data"]["text"], json!("archive me"));
    assert!(connection.find_by_id(&name, &kept["id"]).await.is_ok());
    assert!(
        connection
            .find_by_id(&name, &dropped["id"])
            .await
            .unwrap_err()
            .is_not_found()
    );
}

/// Partial updates, increments and both upsert outcomes.
pub async fn updates_and_upserts(connection: &Connection, suffix: &str) {
    seed_people(connection, suffix).await;
    let bill = Condition::parse(&json!({"name": "Bill Smith"})).unwrap();

    let updated = connection
        .update_where(
            "Person",
            &UpdateSpec::parse(&json!({"age": {"$inc": 1}, "city": "Rome"})).unwrap(),
            &bill,
        )
        .await
        .unwrap();
    assert_eq!(updated, 1);
    let stored = connection.find_one("Person", bill.clone()).await.unwrap().unwrap();
    assert_eq!(stored["age"].as_f64(), Some(28.0));
    assert_eq!(stored["city"], json!("Rome"));

    let mut replaced = stored.clone();
    replaced.insert("city".to_string(), json!("Lyon"));
    replaced.remove("age");
    connection.update("Person", replaced).await.unwrap();
    let stored = connection.find_by_id("Person", &stored["id"]).await.unwrap();
    assert_eq!(stored["city"], json!("Lyon"));
    assert!(stored.get("age").is_none_or(Value::is_null));

    let zed = Condition::parse(&json!({"name": "Zed"})).unwrap();
    let first = connection
        .upsert("Person", &UpdateSpec::new().set("city", json!("Oslo")), &zed)
        .await
        .unwrap();
    assert!(matches!(first, Upserted::Created(_)), "{:?}", first);
    let second = connection
        .upsert("Person", &UpdateSpec::new().set("city", json!("Bergen")), &zed)
        .await
        .unwrap();
    assert_eq!(second, Upserted::Updated(1));
    assert_eq!(connection.count("Person", &zed).await.unwrap(), 1);

    let err = connection
        .update_where(
            "Person",
            &UpdateSpec::parse(&json!({"age": "old", "city": {"$inc": 1}})).unwrap(),
            &zed,
        )
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "'age' is not a valid number,'city' is not a valid string"
    );

    let mut ticket = model("Ticket", suffix);
    ticket.add_column("name", Property::string()).unwrap();
    ticket
        .add_column("status", Property::string().default_value(json!("new")))
        .unwrap();
    ticket.add_column("priority", Property::integer()).unwrap();
    connection.define_model(ticket).unwrap();

    let created = connection
        .create("Ticket", record(json!({"name": "a"})))
        .await
        .unwrap();
    assert_eq!(created["status"], json!("new"));

    let b = Condition::eq("name", json!("b"));
    let upserted = connection
        .upsert("Ticket", &UpdateSpec::new().set("priority", json!(2)), &b)
        .await
        .unwrap();
    assert!(matches!(upserted, Upserted::Created(_)), "{:?}", upserted);
    let stored = connection.find_one("Ticket", b).await.unwrap().unwrap();
    assert_eq!(stored["status"], json!("new"));
    assert_eq!(stored["priority"].as_i64(), Some(2));
}

/// Projection, ordering, paging, streaming and grouping.
pub async fn query_options(connection: &Connection, suffix: &str) {
    seed_people(connection, suffix).await;

    let ordered = connection
        .find(
            "Person",
            &Query::filter(Condition::parse(&json!({"age": {"$gte": 0}})).unwrap())
                .order("-age")
                .skip(1)
                .limit(1)
                .select("name"),
        )
        .await
        .unwrap();
    assert_eq!(ordered.len(), 1);
    assert_eq!(ordered[0]["name"], json!("Daniel Smith"));
    assert!(ordered[0].get("city").is_none());

    let streamed: Vec<Record> = connection
        .stream(
            "Person",
            Query::filter(Condition::eq("city", json!("Paris"))),
        )
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(
        names(&streamed),
        ["Bill Smith", "Daniel Smith"]
            .into_iter()
            .map(str::to_string)
            .collect()
    );

    let group = GroupSpec::new(["city"])
        .field("people", Aggregate::Count)
        .field("oldest", Aggregate::Max("age".to_string()));
    let groups = connection
        .find("Person", &Query::new().group(group))
        .await
        .unwrap();
    let by_city: HashMap<String, (Option<i64>, Option<f64>)> = groups
        .iter()
        .map(|g| {
            (
                g["city"].as_str().unwrap_or_default().to_string(),
                (g["people"].as_i64(), g["oldest"].as_f64()),
            )
        })
        .collect();
    assert_eq!(by_city.len(), 2);
    assert_eq!(by_city["Paris"], (Some(2), Some(35.0)));
    assert_eq!(by_city["Oslo"], (Some(2), Some(41.0)));
}
