//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log file is corrupted beyond the recoverable tail.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A record or batch does not fit the 32-bit length fields of a frame.
    #[error("frame too large: {size} bytes")]
    FrameTooLarge {
        /// Offending length.
        size: usize,
    },

    /// The store has been closed.
    #[error("storage is closed")]
    Closed,

    /// Another process holds the exclusive lock on the store.
    #[error("storage locked: {path}")]
    Locked {
        /// Path of the lock file.
        path: String,
    },

    /// A graph vertex does not exist.
    #[error("vertex not found: {key}")]
    VertexNotFound {
        /// Key of the missing vertex.
        key: String,
    },

    /// A graph edge does not exist.
    #[error("edge not found: {id}")]
    EdgeNotFound {
        /// Identifier of the missing edge.
        id: u64,
    },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
