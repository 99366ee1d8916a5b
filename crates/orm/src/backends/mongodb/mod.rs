//! MongoDB adapter.
//!
//! Conditions compile to filter documents with the
//! [`DocumentCompiler`](crate::compiler::DocumentCompiler); its extended JSON
//! output is converted to BSON at the driver boundary and results come back
//! as relaxed extended JSON. Collections are schemaless, so adding a column
//! is a no-op and only collections and indexes are synchronized.
//!
//! # Example
//!
//! ```no_run
//! use strata_orm::backends::mongodb::{MongoAdapter, MongoConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = MongoAdapter::new(MongoConfig {
//!     uri: "mongodb://localhost:27017".to_string(),
//!     database: "app".to_string(),
//!     ..Default::default()
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

mod backend;

pub use backend::{BsonCodec, MongoAdapter, MongoConfig};

pub(crate) use backend::map_error;
