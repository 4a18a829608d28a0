//! Error types for ModelStore core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in ModelStore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A position lies outside the current bounds of a many-valued feature.
    #[error("index out of range on feature '{feature}': position {position}, size {size}")]
    IndexOutOfRange {
        /// Name of the feature.
        feature: String,
        /// Requested position.
        position: u32,
        /// Size of the feature at the time of the call.
        size: u32,
    },

    /// A class binding already exists with a different class.
    #[error("entity {id} is already bound to {existing}, cannot bind to {requested}")]
    ClassAlreadyExists {
        /// The entity.
        id: String,
        /// The class it is bound to.
        existing: String,
        /// The class that was requested.
        requested: String,
    },

    /// The backend cannot answer an instance lookup.
    #[error("{backend} backend does not support lookup: {message}")]
    UnsupportedLookup {
        /// Name of the backend.
        backend: String,
        /// Description of the missing capability.
        message: String,
    },

    /// The operation is not offered on this path.
    #[error("unsupported operation: {message}")]
    UnsupportedOperation {
        /// Description of the operation.
        message: String,
    },

    /// Physical storage failure.
    #[error("backend I/O error: {0}")]
    BackendIo(#[from] modelstore_storage::StorageError),

    /// Record codec error.
    #[error("codec error: {0}")]
    Codec(#[from] modelstore_codec::CodecError),

    /// A stored or supplied element does not match the feature kind.
    #[error("type mismatch on feature '{feature}': expected {expected}")]
    TypeMismatch {
        /// Name of the feature.
        feature: String,
        /// What the feature accepts.
        expected: &'static str,
    },

    /// Invalid store format or metadata.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The class is not described by the metamodel or cannot be instantiated.
    #[error("cannot instantiate class {class}: {reason}")]
    UnknownClass {
        /// The class.
        class: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The backend has been closed.
    #[error("backend is closed")]
    BackendClosed,
}

impl CoreError {
    /// Creates an index out of range error.
    pub fn index_out_of_range(feature: impl Into<String>, position: u32, size: u32) -> Self {
        Self::IndexOutOfRange {
            feature: feature.into(),
            position,
            size,
        }
    }

    /// Creates an unsupported lookup error.
    pub fn unsupported_lookup(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsupportedLookup {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported_operation(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: message.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(feature: impl Into<String>, expected: &'static str) -> Self {
        Self::TypeMismatch {
            feature: feature.into(),
            expected,
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Returns `true` for the static capability errors.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedLookup { .. } | Self::UnsupportedOperation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelstore_storage::StorageError;

    #[test]
    fn index_out_of_range_message() {
        let err = CoreError::index_out_of_range("items", 5, 2);
        assert_eq!(
            err.to_string(),
            "index out of range on feature 'items': position 5, size 2"
        );
    }

    #[test]
    fn storage_errors_become_backend_io() {
        let err: CoreError = StorageError::Closed.into();
        assert!(matches!(err, CoreError::BackendIo(StorageError::Closed)));
    }

    #[test]
    fn unsupported_classification() {
        assert!(CoreError::unsupported_lookup("kv", "no index").is_unsupported());
        assert!(CoreError::unsupported_operation("move").is_unsupported());
        assert!(!CoreError::BackendClosed.is_unsupported());
    }
}
