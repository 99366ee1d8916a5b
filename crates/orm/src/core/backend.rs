//! Backend identity, capabilities and connection settings.

use serde::{Deserialize, Serialize};

/// Identifies the type of storage backend.
///
/// Used for runtime capability checks and in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// SQLite database (file-based or in-memory).
    Sqlite,
    /// PostgreSQL database.
    Postgres,
    /// MongoDB (document store).
    MongoDB,
    /// Key-value store (in-memory or object storage).
    KeyValue,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::MongoDB => write!(f, "mongodb"),
            BackendKind::KeyValue => write!(f, "key-value"),
        }
    }
}

/// Capabilities that a backend may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCapability {
    /// Conditions on columns other than `id`.
    Query,
    /// Bare regular expression leaves.
    RegexMatch,
    /// Foreign keys enforced by the backend itself.
    NativeIntegrity,
    /// `order` on finds.
    Ordering,
    /// Grouped queries with aggregate fields.
    Grouping,
    /// Cursor-backed streaming reads.
    Streaming,
    /// Adding columns to an existing table.
    AlterTable,
}

impl std::fmt::Display for BackendCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendCapability::Query => "query",
            BackendCapability::RegexMatch => "regex-match",
            BackendCapability::NativeIntegrity => "native-integrity",
            BackendCapability::Ordering => "ordering",
            BackendCapability::Grouping => "grouping",
            BackendCapability::Streaming => "streaming",
            BackendCapability::AlterTable => "alter-table",
        };
        write!(f, "{}", name)
    }
}

/// Backend-neutral connection settings.
///
/// Each backend converts these into its own configuration struct; fields a
/// backend has no use for are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterSettings {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Database name; a file path or `:memory:` for SQLite.
    pub database: String,
    #[serde(default)]
    pub pool_size: Option<u32>,
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default)]
    pub collation: Option<String>,
}

impl AdapterSettings {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Default::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = Some(size);
        self
    }
}
