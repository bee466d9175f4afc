// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-level error: configuration, local storage and setup failures.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error(transparent)]
    Setup(#[from] SetupError),
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors reported by a remote footage source (vendor API or camera).
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("Request rejected as unauthorized: {0}")]
    Unauthorized(String),

    #[error("Remote resource not found: {0}")]
    NotFound(String),

    #[error("Scope '{0}' does not match any camera or location")]
    ScopeNotFound(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Remote server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Body truncated: expected {expected} bytes, received {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("Unexpected response: {0}")]
    Protocol(String),
}

impl SourceError {
    /// Timeouts, 5xx and connection-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Timeout(_)
                | SourceError::Server { .. }
                | SourceError::Network(_)
                | SourceError::Truncated { .. }
        )
    }
}

/// Failure of a single segment transfer attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Size mismatch: expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Local write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Source(e) => e.is_retryable(),
            FetchError::SizeMismatch { .. } => true,
            FetchError::Io(_) | FetchError::Cancelled => false,
        }
    }
}

/// A camera's segment listing could not be obtained.
#[derive(Debug, Clone, Error)]
#[error("Listing unavailable for camera '{camera}' after {attempts} attempt(s): {source}")]
pub struct CatalogError {
    pub camera: String,
    pub attempts: u32,
    #[source]
    pub source: SourceError,
}

/// Fatal errors that stop a run before any download starts.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Scope '{0}' does not match any camera or location")]
    ScopeNotFound(String),

    #[error("Scope resolved to zero cameras")]
    EmptyScope,

    #[error("Client is not authenticated: {0}")]
    Unauthorized(String),

    #[error("Invalid time window: {0}")]
    InvalidWindow(String),

    #[error("Cannot prepare destination '{path}': {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Scope resolution failed: {0}")]
    Source(SourceError),
}

impl From<SourceError> for SetupError {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::ScopeNotFound(s) => SetupError::ScopeNotFound(s),
            SourceError::Unauthorized(s) => SetupError::Unauthorized(s),
            other => SetupError::Source(other),
        }
    }
}
