//! Core adapter traits and abstractions.
//!
//! - [`Adapter`] - the contract every storage engine implements: DDL,
//!   CRUD, streaming, counting and introspection
//! - [`ValueCodec`] - model value to wire value marshalling
//! - [`BackendKind`] / [`BackendCapability`] - runtime identity and
//!   capability discovery
//! - [`AdapterSettings`] - backend-neutral connection settings
//!
//! Not every engine can do everything. Use
//! [`Adapter::supports`] before relying on optional behavior:
//!
//! ```ignore
//! use strata_orm::core::{Adapter, BackendCapability};
//!
//! fn cascades_natively(adapter: &dyn Adapter) -> bool {
//!     adapter.supports(BackendCapability::NativeIntegrity)
//! }
//! ```

mod adapter;
mod backend;

pub use adapter::{Adapter, RecordStream, Upserted, ValueCodec, upsert_fallback, upsert_record};
pub use backend::{AdapterSettings, BackendCapability, BackendKind};
