//! Error types for the adk controller.

use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for controller operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A named resource does not exist in the store.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Resource kind (e.g. "Agent").
        kind: &'static str,
        /// Resource name.
        name: String,
    },

    /// An optimistic-concurrency precondition failed.
    #[error("conflict updating {kind} '{name}': stale resource version")]
    Conflict {
        /// Resource kind.
        kind: &'static str,
        /// Resource name.
        name: String,
    },

    /// A resource spec failed validation. Terminal, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// The planner call or reply handling failed.
    #[error("planner error: {0}")]
    Planner(String),

    /// The sandbox failed before the tool could produce an outcome.
    #[error("sandbox error: {0}")]
    Sandbox(String),

    /// A store operation failed for a reason other than not-found/conflict.
    #[error("store error: {0}")]
    Store(String),

    /// Workload identity failure.
    #[error("identity error: {0}")]
    Identity(String),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new not-found error.
    #[must_use]
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a new conflict error.
    #[must_use]
    pub fn conflict(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            name: name.into(),
        }
    }

    /// Create a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a new planner error.
    #[must_use]
    pub fn planner(message: impl Into<String>) -> Self {
        Self::Planner(message.into())
    }

    /// Create a new sandbox error.
    #[must_use]
    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::Sandbox(message.into())
    }

    /// Create a new store error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a new identity error.
    #[must_use]
    pub fn identity(message: impl Into<String>) -> Self {
        Self::Identity(message.into())
    }

    /// Whether this error is a not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error is an optimistic-concurrency conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
