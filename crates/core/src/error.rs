//! Error types for Sandbox Fleet.

use thiserror::Error;

/// Result type alias using Sandbox Fleet's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Sandbox Fleet.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors (fatal at construction)
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid thread id {0:?}: only alphanumerics, hyphens and underscores are allowed")]
    InvalidThreadId(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Sandbox creation failed: {0}")]
    CreationFailed(String),

    #[error("Sandbox {sandbox_id} failed to become ready within {timeout_secs}s at {sandbox_url}")]
    ReadinessTimeout {
        sandbox_id: String,
        sandbox_url: String,
        timeout_secs: u64,
    },

    #[error("Backend error: {0}")]
    Backend(String),

    // =========================================================================
    // State Store Errors
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Provisioning Service Errors
    // =========================================================================
    #[error("Cluster error: {0}")]
    Cluster(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Partial cleanup: {}", .0.join(", "))]
    PartialCleanup(Vec<String>),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a creation failure.
    pub fn creation_failed(msg: impl Into<String>) -> Self {
        Self::CreationFailed(msg.into())
    }

    /// Create a backend error.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a cluster error.
    pub fn cluster(msg: impl Into<String>) -> Self {
        Self::Cluster(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error means the requested resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
