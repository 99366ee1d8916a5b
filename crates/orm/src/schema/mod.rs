//! Declared model schemas and live schema snapshots.
//!
//! - [`ModelSchema`] - columns, nested prefixes, indexes, associations and
//!   integrity rules of one model
//! - [`ModelRegistry`] - the explicit set of models a connection manages
//! - [`SchemaSnapshot`] - what a backend reports it currently has
//!
//! # Example
//!
//! ```
//! use strata_orm::schema::{IntegrityAction, ModelRegistry, ModelSchema, HasManyOptions};
//! use strata_orm::types::Property;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ModelRegistry::new();
//!
//! let mut user = ModelSchema::new("User");
//! user.add_column("name", Property::string().required())?;
//! registry.define(user)?;
//!
//! let mut post = ModelSchema::new("Post");
//! post.add_column("title", Property::string())?;
//! registry.define(post)?;
//!
//! registry.has_many(
//!     "User",
//!     "Post",
//!     HasManyOptions::default().integrity(IntegrityAction::Delete),
//! )?;
//!
//! let post = registry.get("Post")?;
//! assert!(post.property("user_id").is_some());
//! assert_eq!(registry.get("User")?.table_name(), "users");
//! # Ok(())
//! # }
//! ```

mod callback;
mod index;
mod integrity;
mod model;
mod registry;
mod snapshot;

pub use callback::{Callback, CallbackEvent, RecordHook};
pub use index::{IndexDescriptor, SortDirection};
pub use integrity::{
    Association, AssociationKind, IntegrityAction, IntegrityDescriptor, IntegrityRole,
};
pub use model::{ModelSchema, snake_case, tableize};
pub use registry::{
    ARCHIVE_MODEL, BelongsToOptions, HasManyOptions, HasOneOptions, ModelRegistry,
};
pub use snapshot::{ColumnSnapshot, ForeignKeySnapshot, SchemaSnapshot, TableSnapshot};
