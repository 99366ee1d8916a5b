//! Condition compilers.
//!
//! Three strategies turn a [`Condition`](crate::condition::Condition) into
//! something a backend can evaluate:
//!
//! - [`sql`] - parameterized SQL fragments, shared by every relational
//!   backend and varied through [`SqlDialect`](sql::SqlDialect)
//! - [`document`] - native filter documents and aggregation pipelines
//! - [`key`] - identifier lookups for key-value stores, which have no
//!   query engine
//!
//! Every strategy resolves column names against the model first, so an
//! unknown column or operator fails at compile time regardless of backend.

pub mod document;
pub mod key;
pub mod sql;

pub use document::{DocumentCompiler, native_value, stored_value};
pub use key::{KeyLookup, compile_key_lookup, key_of};
pub use sql::{PostgresDialect, SqlCompiler, SqlDialect, SqlFragment, SqlParam, SqliteDialect};
