//! Error types for notesync.
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for sync operations
pub type NoteSyncResult<T> = Result<T, NoteSyncError>;

/// Main error type for sync operations
#[derive(Error, Debug)]
pub enum NoteSyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Authentication failed (HTTP {status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Not found (HTTP {status}): {message}")]
    NotFound { status: u16, message: String },

    #[error("Conflict (HTTP {status}): {message}")]
    Conflict { status: u16, message: String },

    #[error("Remote error (HTTP {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database operation failed: {0}")]
    DatabaseOperation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Sync already running for {0}")]
    Busy(String),
}

impl NoteSyncError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        NoteSyncError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        NoteSyncError::Config(message.into())
    }

    /// Create a new database operation error
    pub fn database_op(message: impl Into<String>) -> Self {
        NoteSyncError::DatabaseOperation(message.into())
    }

    /// Classify a failed HTTP response by status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => NoteSyncError::Auth { status, message },
            404 => NoteSyncError::NotFound { status, message },
            409 | 412 | 422 => NoteSyncError::Conflict { status, message },
            _ => NoteSyncError::Remote { status, message },
        }
    }

    /// HTTP status carried by remote errors, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            NoteSyncError::Auth { status, .. }
            | NoteSyncError::NotFound { status, .. }
            | NoteSyncError::Conflict { status, .. }
            | NoteSyncError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for a 404 from the remote
    pub fn is_not_found(&self) -> bool {
        matches!(self, NoteSyncError::NotFound { .. })
    }
}
