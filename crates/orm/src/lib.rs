//! Strata ORM
//!
//! Declare models once and run the same queries and persistence operations
//! against structurally different storage backends: relational engines,
//! a document store and key-value stores.
//!
//! # Features
//!
//! - **Condition DSL**: one JSON-shaped condition language compiled to
//!   parameterized SQL, native filter documents or key lookups
//! - **Schema synchronization**: declared models are diffed against the live
//!   schema and only the missing tables, columns, indexes and foreign keys
//!   are created
//! - **Referential integrity**: `nullify`, `restrict` and `delete` rules
//!   enforced natively where the backend can, by the cascade engine elsewhere
//! - **Archival**: rows copied to a reserved archive table before deletion
//!
//! # Backend Features
//!
//! Enable backends with feature flags in `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! strata-orm = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! Available backend features:
//! - `sqlite` (default) - SQLite with in-memory and file modes
//! - `postgres` - PostgreSQL with native foreign keys and regex matching
//! - `mongodb` - MongoDB document storage
//! - `object-store` - key-value records in any `object_store` backend
//!
//! The in-memory key-value backend is always available.
//!
//! # Architecture
//!
//! - [`types`] - value kinds, properties and records
//! - [`schema`] - model schemas, indexes, associations and the registry
//! - [`condition`] - the condition tree, updates, grouping and query options
//! - [`compiler`] - SQL, document and key-lookup compilation strategies
//! - [`core`] - the [`Adapter`] contract and capability discovery
//! - [`backends`] - adapter implementations
//! - [`sync`] - the schema synchronizer
//! - [`integrity`] - the cascade engine and archival
//! - [`association`] - memoized association loading
//! - [`connection`] - model-level entry points
//! - [`error`] - error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use serde_json::json;
//! use strata_orm::backends::kv::KvAdapter;
//! use strata_orm::condition::Condition;
//! use strata_orm::schema::ModelSchema;
//! use strata_orm::types::Property;
//! use strata_orm::Connection;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let connection = Connection::new(KvAdapter::in_memory());
//!
//! let mut user = ModelSchema::new("User");
//! user.add_column("name", Property::string().required())?;
//! connection.define_model(user)?;
//!
//! let record = json!({"name": "Bill"}).as_object().cloned().unwrap_or_default();
//! let bill = connection.create("User", record).await?;
//!
//! let found = connection.find_by_id("User", &bill["id"]).await?;
//! assert_eq!(found["name"], json!("Bill"));
//! assert_eq!(connection.count("User", &Condition::all()).await?, 1);
//! # Ok(())
//! # }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

pub mod association;
pub mod backends;
pub mod compiler;
pub mod condition;
pub mod connection;
pub mod core;
pub mod error;
pub mod integrity;
pub mod schema;
pub mod sync;
pub mod types;

// Re-export commonly used types at crate root
pub use condition::{Condition, Leaf, Query, UpdateSpec};
pub use connection::Connection;
pub use error::{StorageError, StorageResult};
pub use schema::{ModelRegistry, ModelSchema};
pub use types::{ColumnType, Property, Record};

// Re-export core traits
pub use core::{Adapter, BackendCapability, BackendKind, Upserted};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
