//! Error types for the mapping layer.
//!
//! Errors are organized by where they originate: condition compilation,
//! record lookup, integrity enforcement, validation, and the backend driver.
//! Every public operation returns a [`StorageResult`]; driver-specific errors
//! are mapped onto this taxonomy by the backend that produced them.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Condition, update, group or query compile errors
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Record and table lookup errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Referential and uniqueness violations
    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    /// Validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Compile-time errors raised while turning conditions into backend fragments.
///
/// These are raised immediately and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    #[error("invalid group field '{field}': {message}")]
    InvalidGroupField { field: String, message: String },

    #[error("unknown model '{0}'")]
    UnknownModel(String),
}

/// Errors related to record and table lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Zero rows where exactly one was expected.
    #[error("not found")]
    NotFound,

    #[error("table does not exist")]
    TableDoesNotExist,
}

/// Errors raised when a write or delete breaks uniqueness or referential rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// Unique constraint violation; the column is extracted from the driver
    /// message when possible.
    #[error("duplicated{}", .column.as_ref().map(|c| format!(" {}", c)).unwrap_or_default())]
    Duplicated { column: Option<String> },

    /// Referential restrict violation or native foreign key violation on delete.
    #[error("rejected")]
    Rejected,
}

/// Errors related to record validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("'{0}' is required")]
    Required(String),

    #[error("'{column}' is not a valid {expected}")]
    InvalidValue { column: String, expected: String },

    #[error("column '{0}' is already declared with a different type")]
    ColumnRedefinition(String),

    #[error("unresolved callback method '{0}'")]
    UnresolvedCallback(String),

    /// Several failures found in one pass, reported as a single message.
    #[error("{}", join_messages(.0))]
    Multiple(Vec<ValidationError>),
}

fn join_messages(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl ValidationError {
    /// Collapses a list of failures into one error, or `None` when empty.
    pub fn from_list(mut errors: Vec<ValidationError>) -> Option<ValidationError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ValidationError::Multiple(errors)),
        }
    }
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// The requested capability is not supported by this backend.
    #[error("capability '{capability}' not supported by {backend_name}")]
    UnsupportedCapability {
        backend_name: String,
        capability: String,
    },

    /// The driver returned a shape the adapter cannot interpret.
    #[error("unexpected result: {message}")]
    UnexpectedResult { message: String },

    /// Opaque driver failure; the original cause is kept for diagnostics.
    #[error("unknown error")]
    Unknown {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for all operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Builds an `unknown error` wrapping the driver failure.
    pub fn unknown<E>(backend_name: &str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StorageError::Backend(BackendError::Unknown {
            backend_name: backend_name.to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }

    /// Builds an `unexpected result` error.
    pub fn unexpected(message: impl Into<String>) -> Self {
        StorageError::Backend(BackendError::UnexpectedResult {
            message: message.into(),
        })
    }

    /// Builds a capability error for a backend that cannot evaluate something.
    pub fn unsupported(backend_name: &str, capability: impl Into<String>) -> Self {
        StorageError::Backend(BackendError::UnsupportedCapability {
            backend_name: backend_name.to_string(),
            capability: capability.into(),
        })
    }

    /// Returns true for unique constraint violations.
    pub fn is_duplicated(&self) -> bool {
        matches!(
            self,
            StorageError::Integrity(IntegrityError::Duplicated { .. })
        )
    }

    /// Returns true when a single expected record was missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Resource(ResourceError::NotFound))
    }

    /// Returns true for restrict and foreign key rejections.
    pub fn is_rejected(&self) -> bool {
        matches!(self, StorageError::Integrity(IntegrityError::Rejected))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::unexpected(format!("serialization: {}", err))
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        crate::backends::sqlite::map_error(err)
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::ConnectionFailed {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        crate::backends::postgres::map_error(err)
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for StorageError {
    fn from(err: mongodb::error::Error) -> Self {
        crate::backends::mongodb::map_error(err)
    }
}

#[cfg(feature = "object-store")]
impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        StorageError::unknown("object-store", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_messages() {
        assert_eq!(ResourceError::NotFound.to_string(), "not found");
        assert_eq!(
            ResourceError::TableDoesNotExist.to_string(),
            "table does not exist"
        );
        assert_eq!(IntegrityError::Rejected.to_string(), "rejected");
        assert_eq!(
            QueryError::UnknownColumn("agee".to_string()).to_string(),
            "unknown column 'agee'"
        );
        assert_eq!(
            QueryError::UnknownOperator("$foo".to_string()).to_string(),
            "unknown operator '$foo'"
        );
    }

    #[test]
    fn test_duplicated_display() {
        let err = IntegrityError::Duplicated { column: None };
        assert_eq!(err.to_string(), "duplicated");

        let err = IntegrityError::Duplicated {
            column: Some("age".to_string()),
        };
        assert_eq!(err.to_string(), "duplicated age");
    }

    #[test]
    fn test_multiple_validation_errors_are_joined() {
        let err = ValidationError::from_list(vec![
            ValidationError::Required("name".to_string()),
            ValidationError::Required("age".to_string()),
        ])
        .unwrap();
        assert_eq!(err.to_string(), "'name' is required,'age' is required");

        let single =
            ValidationError::from_list(vec![ValidationError::Required("name".to_string())])
                .unwrap();
        assert_eq!(single.to_string(), "'name' is required");

        assert!(ValidationError::from_list(vec![]).is_none());
    }

    #[test]
    fn test_unknown_error_preserves_source() {
        let io = std::io::Error::other("socket closed");
        let err = StorageError::unknown("sqlite", io);
        assert_eq!(err.to_string(), "unknown error");

        // transparent variants forward source() to the wrapped BackendError
        let source = std::error::Error::source(&err);
        assert!(source.is_some());
        assert_eq!(source.unwrap().to_string(), "socket closed");
    }

    #[test]
    fn test_predicates() {
        let dup: StorageError = IntegrityError::Duplicated { column: None }.into();
        assert!(dup.is_duplicated());
        assert!(!dup.is_rejected());

        let missing: StorageError = ResourceError::NotFound.into();
        assert!(missing.is_not_found());
    }
}
