//! Model and record fixtures.
//!
//! Tests that share one database (the container-backed suites) give every
//! table a random suffix so they never see each other's rows.

use serde_json::{Value, json};

use strata_orm::schema::{ModelSchema, tableize};
use strata_orm::types::{Property, Record};

/// Converts a JSON object literal into a record.
pub fn record(value: Value) -> Record {
    value
        .as_object()
        .cloned()
        .expect("fixture records are JSON objects")
}

/// A short random suffix for table names.
pub fn unique_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// A model whose table name carries `suffix`.
pub fn model(name: &str, suffix: &str) -> ModelSchema {
    ModelSchema::new(name).with_table_name(format!("{}_{}", tableize(name), suffix))
}

/// `Person{name, age, city}` used by the condition scenarios.
pub fn person(suffix: &str) -> ModelSchema {
    let mut person = model("Person", suffix);
    person.add_column("name", Property::string()).unwrap();
    person.add_column("age", Property::number()).unwrap();
    person.add_column("city", Property::string()).unwrap();
    person
}

/// Four people; Gina Baker has no age.
pub fn people() -> Vec<Record> {
    vec![
        record(json!({"name": "Bill Smith", "age": 27, "city": "Paris"})),
        record(json!({"name": "Daniel Smith", "age": 35, "city": "Paris"})),
        record(json!({"name": "John Doe", "age": 41, "city": "Oslo"})),
        record(json!({"name": "Gina Baker", "city": "Oslo"})),
    ]
}

/// `User{name, age}` used by the uniqueness scenario.
pub fn user(suffix: &str) -> ModelSchema {
    let mut user = model("User", suffix);
    user.add_column("name", Property::string()).unwrap();
    user.add_column("age", Property::number()).unwrap();
    user
}

/// One column of every portable value kind, including a nested column.
pub fn sample(suffix: &str) -> ModelSchema {
    let mut sample = model("Sample", suffix);
    sample.add_column("label", Property::string()).unwrap();
    sample.add_column("body", Property::text()).unwrap();
    sample.add_column("ratio", Property::number()).unwrap();
    sample.add_column("count", Property::integer()).unwrap();
    sample.add_column("enabled", Property::boolean()).unwrap();
    sample.add_column("seen_at", Property::date()).unwrap();
    sample.add_column("meta", Property::object()).unwrap();
    sample.add_column("address.city", Property::string()).unwrap();
    sample
}
