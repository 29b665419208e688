//! Error types for relation loading.
//!
//! Two families exist: configuration errors, which describe a schema or
//! resolver wiring mistake and are reported before any fetch is scheduled,
//! and source errors, which come back from the persistence layer when a
//! combined fetch fails.

use thiserror::Error;

/// A wiring or schema mistake detected while resolving a relation field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// The parent type is not a known model.
    #[error("unknown model `{0}`")]
    UnknownModel(String),

    /// The model declares no relation of the requested name.
    #[error("model `{model}` has no relation named `{relation}`")]
    UnknownRelation { model: String, relation: String },

    /// A scope referenced by a field is not registered.
    #[error("unknown scope `{0}`")]
    UnknownScope(String),

    /// The `edge_type` of a relation field does not name a known type.
    #[error("the edge type `{edge_type}` on field `{field}` must reference an existing object type")]
    UnknownEdgeType { field: String, edge_type: String },

    /// Pagination was requested on a relation that yields a single row.
    #[error("relation `{relation}` on `{model}` is not a to-many relation and cannot be paginated")]
    NotPaginatable { model: String, relation: String },

    /// A pagination argument could not be interpreted.
    #[error("invalid pagination argument `{argument}`: {reason}")]
    InvalidPaginationArgument { argument: String, reason: String },

    /// No page size was given and no default is configured.
    #[error("field `{0}` requires a page size but no default count is configured")]
    MissingPageSize(String),

    /// The parent value carries no primary key.
    #[error("parent of type `{model}` has no value for primary key `{key}`")]
    MissingParentKey { model: String, key: String },

    /// `load` was called before a strategy was attached.
    #[error("no relation loader attached for batch `{0}`")]
    MissingStrategy(String),

    /// A second, different strategy tried to claim an attached batch.
    #[error("batch `{key}` already uses a {attached} loader, refusing {requested}")]
    DivergentStrategy {
        key: String,
        attached: String,
        requested: String,
    },
}

/// A failure reported by a [`DataSource`](crate::source::DataSource).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SourceError {
    /// Human-readable error message.
    pub message: String,
}

impl SourceError {
    /// Creates a new source error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Any error observed by a relation load.
///
/// Cloneable so that a failed combined fetch can be delivered to every
/// parent waiting on the same batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoaderError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("execution error: {0}")]
    Execution(#[from] SourceError),
}

impl LoaderError {
    /// Returns the error code reported to clients.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Execution(_) => "EXECUTION_ERROR",
        }
    }

    /// Returns true if this is a configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Result type used throughout the loader.
pub type LoaderResult<T> = Result<T, LoaderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let config: LoaderError = ConfigurationError::UnknownScope("approved".into()).into();
        assert_eq!(config.code(), "CONFIGURATION_ERROR");
        assert!(config.is_configuration());

        let exec: LoaderError = SourceError::new("connection reset").into();
        assert_eq!(exec.code(), "EXECUTION_ERROR");
        assert!(!exec.is_configuration());
    }

    #[test]
    fn test_error_messages() {
        let err = ConfigurationError::UnknownRelation {
            model: "User".into(),
            relation: "friends".into(),
        };
        assert_eq!(err.to_string(), "model `User` has no relation named `friends`");

        let err = LoaderError::from(SourceError::new("timeout"));
        assert_eq!(err.to_string(), "execution error: timeout");
    }
}
