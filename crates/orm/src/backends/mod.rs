//! Storage adapter implementations.
//!
//! Each relational or document backend is gated behind a feature flag; the
//! key-value adapter is always available.
//!
//! # Available Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | SQLite | `sqlite` | Embedded database, in-memory or file-based |
//! | PostgreSQL | `postgres` | Native foreign keys and regex matching |
//! | MongoDB | `mongodb` | Document store with aggregation pipelines |
//! | Key-value | (always) / `object-store` | Lookup by id only |
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! use strata_orm::backends::sqlite::SqliteAdapter;
//!
//! # #[cfg(feature = "sqlite")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create an in-memory SQLite adapter
//! let adapter = SqliteAdapter::in_memory()?;
//!
//! // Or use a file-based database
//! let adapter = SqliteAdapter::open("./data/app.db")?;
//! # Ok(())
//! # }
//! ```

pub mod kv;
pub mod sql;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mongodb")]
pub mod mongodb;
