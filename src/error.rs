//! Error types for bundlecache
//!
//! All modules use `BundleCacheResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for bundlecache operations
pub type BundleCacheResult<T> = Result<T, BundleCacheError>;

/// All errors that can occur in bundlecache
#[derive(Error, Debug)]
pub enum BundleCacheError {
    // Catalog contract errors
    #[error("Invalid update: {0}")]
    Validation(String),

    #[error("Update already exists: {0}")]
    Conflict(Uuid),

    #[error("Update {0} is the active update and cannot be deleted")]
    Referential(Uuid),

    #[error("Update not found: {0}")]
    UpdateNotFound(Uuid),

    #[error("Catalog database error: {0}")]
    Database(#[from] sqlx::Error),

    // Asset store errors
    #[error("Asset {key} failed verification: expected {expected}, got {actual}")]
    Corruption {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Asset source failed for {key}: {reason}")]
    AssetSource { key: String, reason: String },

    #[error("Invalid asset path: {path}: {reason}")]
    PathInvalid { path: String, reason: String },

    // Launch errors
    #[error("No bootable update found: {0}")]
    Fatal(String),

    #[error("Timed out after {waited_ms}ms waiting for the cache lock ({purpose})")]
    LockTimeout { purpose: &'static str, waited_ms: u64 },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BundleCacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Create an asset source error
    pub fn asset_source(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AssetSource {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the caller violated a catalog contract
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Conflict(_) | Self::Referential(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Fatal(_) => Some("The embedded bundle is unreadable; reinstall the application"),
            Self::LockTimeout { .. } => Some("Another launch or sweep is in progress; try again"),
            Self::Referential(_) => Some("Pass a different active update or launch another update first"),
            Self::Corruption { .. } => Some("Re-download the asset; the source bytes do not match its hash"),
            _ => None,
        }
    }
}
