//! Key-value adapter.
//!
//! Stores one JSON document per record under `data/<table>/<id>` in any
//! [`KeyValueStore`]. There is no query engine: only `id` equality and
//! membership conditions are answered (by key lookup), the empty condition
//! by a prefix scan, and anything else fails with a capability error.
//!
//! The store is process-local by default ([`MemoryStore`]). With the
//! `object-store` feature, [`ObjectStoreKv`] keeps records in any
//! `object_store` backend.
//!
//! # Example
//!
//! ```
//! use strata_orm::backends::kv::KvAdapter;
//!
//! let adapter = KvAdapter::in_memory();
//! ```

mod backend;
#[cfg(feature = "object-store")]
mod object;
mod store;

pub use backend::{KvAdapter, KvConfig, KvKeyspace};
#[cfg(feature = "object-store")]
pub use object::ObjectStoreKv;
pub use store::{KeyValueStore, MemoryStore};
