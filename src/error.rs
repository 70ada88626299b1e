//! Keepsake error types

use std::time::Duration;

/// Keepsake error types
#[derive(Debug, thiserror::Error)]
pub enum KeepsakeError {
    // Remote document store errors
    #[error("remote fetch failed for '{collection}': {message}")]
    RemoteFetch { collection: String, message: String },

    // State store errors
    #[error("validation failed for '{key}': {reason}")]
    Validation { key: String, reason: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    // Controller errors
    /// Saving requires an owner identity; nothing was written.
    #[error("authentication required to save '{0}'")]
    AuthRequired(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    // Data errors
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl KeepsakeError {
    /// Build a [`RemoteFetch`](Self::RemoteFetch) error for a collection.
    pub fn remote(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteFetch {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Whether the error came from the durable storage layer.
    ///
    /// Quota exhaustion counts as a storage failure.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::QuotaExceeded { .. })
    }

    /// Message suitable for a user-visible notification.
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthRequired(_) => "You must be signed in to save data.".to_string(),
            Self::Validation { reason, .. } => format!("Invalid data: {reason}"),
            Self::QuotaExceeded { .. } => "Local storage is full.".to_string(),
            Self::Timeout(_) => "Saving took too long. Your changes are kept.".to_string(),
            other => format!("Failed to save data: {other}"),
        }
    }
}

/// Result type alias for Keepsake operations
pub type Result<T> = std::result::Result<T, KeepsakeError>;
