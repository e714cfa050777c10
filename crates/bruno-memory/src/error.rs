//! Error types for the memory crate.

use thiserror::Error;

use crate::validation::ValidationError;

/// Coarse failure class, used by callers to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Storage could not be reached or opened.
    Connection,
    /// Caller supplied an entity that breaks an invariant. Never retried.
    Validation,
    /// Engine or I/O failure during an otherwise valid operation.
    Operation,
    /// Schema evolution could not complete.
    Migration,
}

/// Errors that can occur in the memory crate.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Storage is unreachable, not connected, or unusable.
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    /// Caller-supplied data failed validation before any I/O happened.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization of a JSON column failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Schema migration failed.
    #[error("Migration error: {message}")]
    Migration {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },
}

impl MemoryError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn connection_with(message: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration {
            message: message.into(),
            source: None,
        }
    }

    pub fn migration_with(message: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Migration {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Which failure class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Database(_) | Self::Serialization(_) | Self::InvalidData(_) => {
                ErrorKind::Operation
            }
            Self::Migration { .. } => ErrorKind::Migration,
        }
    }

    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Operation
    }
}

/// Result type alias for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
