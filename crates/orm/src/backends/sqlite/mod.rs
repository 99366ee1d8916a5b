//! SQLite adapter.
//!
//! Supports both in-memory databases (great for testing) and file-based
//! databases. Statements come from the shared relational builder with the
//! [`SqliteDialect`](crate::compiler::SqliteDialect): `?N` placeholders,
//! `LIKE` for pattern operators and no regex operator.
//!
//! SQLite cannot add a foreign key to an existing table, so integrity rules
//! are always enforced by the cascade engine here.
//!
//! # Example
//!
//! ```no_run
//! use strata_orm::backends::sqlite::SqliteAdapter;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Create an in-memory database
//! let adapter = SqliteAdapter::in_memory()?;
//!
//! // Or use a file-based database
//! let adapter = SqliteAdapter::open("./data/app.db")?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod schema;

pub use backend::{SqliteAdapter, SqliteConfig};

pub(crate) use backend::map_error;
