//! Association and integrity descriptors.

use std::fmt;

/// Which side of a reference a descriptor is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrityRole {
    /// The referenced model; drives the cascade engine.
    Parent,
    /// The referencing model; drives native foreign key emission.
    Child,
}

/// What happens to referencing rows when a referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrityAction {
    Nullify,
    Restrict,
    Delete,
}

impl IntegrityAction {
    /// The `ON DELETE` clause for native foreign keys.
    pub fn on_delete(self) -> &'static str {
        match self {
            IntegrityAction::Nullify => "SET NULL",
            IntegrityAction::Restrict => "RESTRICT",
            IntegrityAction::Delete => "CASCADE",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IntegrityAction::Nullify => "nullify",
            IntegrityAction::Restrict => "restrict",
            IntegrityAction::Delete => "delete",
        }
    }
}

/// One half of a referential rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityDescriptor {
    pub role: IntegrityRole,
    pub action: IntegrityAction,
    /// Foreign key column on the child model.
    pub column: String,
    /// Name of the model on the other side.
    pub counterpart: String,
}

impl IntegrityDescriptor {
    /// Builds the matching parent and child descriptors for one reference.
    pub fn pair(
        parent: &str,
        child: &str,
        column: &str,
        action: IntegrityAction,
    ) -> (IntegrityDescriptor, IntegrityDescriptor) {
        (
            IntegrityDescriptor {
                role: IntegrityRole::Parent,
                action,
                column: column.to_string(),
                counterpart: child.to_string(),
            },
            IntegrityDescriptor {
                role: IntegrityRole::Child,
                action,
                column: column.to_string(),
                counterpart: parent.to_string(),
            },
        )
    }
}

impl fmt::Display for IntegrityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            IntegrityRole::Parent => "parent",
            IntegrityRole::Child => "child",
        };
        write!(f, "{}_{}", role, self.action.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationKind {
    BelongsTo,
    HasOne,
    HasMany,
}

/// A named link from one model to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    /// Accessor name used with `Connection::load`.
    pub name: String,
    pub kind: AssociationKind,
    pub counterpart: String,
    /// Foreign key column. Lives on the counterpart for `HasOne`/`HasMany`
    /// and on the owning model for `BelongsTo`.
    pub foreign_key: String,
}
