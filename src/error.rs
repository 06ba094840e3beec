//! Error types for Parley
//!
//! This module defines all error types used throughout the crate,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Parley operations
///
/// Conversation store, orchestrator and configuration failures are all
/// expressed through this enum. Fallible functions return
/// [`Result`], and callers recover the kind with
/// `err.downcast_ref::<ParleyError>()`.
#[derive(Error, Debug)]
pub enum ParleyError {
    /// Ownership check failed or no ownership record exists.
    ///
    /// Deliberately carries no detail so that a missing chat and a chat
    /// owned by someone else are indistinguishable to the caller.
    #[error("Not authorized")]
    Unauthorized,

    /// Backing store errors (reads, writes, failed transactions)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Completion backend errors (transport, non-success status, bad body)
    #[error("Completion backend error: {0}")]
    Completion(String),

    /// Input rejected before touching any collaborator
    #[error("Validation error: {0}")]
    Validation(String),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ParleyError {
    /// Short, stable label for the error kind, used as a metrics label
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::error::ParleyError;
    ///
    /// assert_eq!(ParleyError::Unauthorized.kind(), "unauthorized");
    /// assert_eq!(ParleyError::Storage("down".into()).kind(), "storage");
    /// ```
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Storage(_) => "storage",
            Self::Completion(_) => "completion",
            Self::Validation(_) => "validation",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Yaml(_) => "yaml",
            Self::Http(_) => "http",
        }
    }
}

/// Result type alias for Parley operations
///
/// Uses `anyhow::Error` so context can be attached while the typed
/// [`ParleyError`] stays recoverable through downcasting.
pub type Result<T> = anyhow::Result<T>;

/// Label for an arbitrary error, falling back to `"other"` when the error
/// does not wrap a [`ParleyError`].
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<ParleyError>()
        .map(ParleyError::kind)
        .unwrap_or("other")
}
