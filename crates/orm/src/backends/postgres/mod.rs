//! PostgreSQL adapter.
//!
//! Uses the shared relational builder with the
//! [`PostgresDialect`](crate::compiler::PostgresDialect): `$N` placeholders,
//! `ILIKE` for pattern operators, `~`/`~*` for regular expressions and
//! native foreign keys, so integrity rules are enforced by the database.
//!
//! # Example
//!
//! ```no_run
//! use strata_orm::backends::postgres::{PostgresAdapter, PostgresConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = PostgresAdapter::new(PostgresConfig {
//!     host: "localhost".to_string(),
//!     dbname: "app".to_string(),
//!     ..Default::default()
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod schema;

pub use backend::{PostgresAdapter, PostgresConfig};

pub(crate) use backend::map_error;
