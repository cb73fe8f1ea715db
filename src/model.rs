//! Domain records shared by the catalog, the asset store and the selector
//!
//! `Update` and `Asset` mirror catalog rows. `NewUpdate` and `NewAsset` are
//! what a fetcher hands over when it commits a downloaded update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of an update
pub type UpdateId = Uuid;

/// A committed update bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    /// Unique update ID
    pub id: UpdateId,

    /// Project this update belongs to
    pub scope_key: String,

    /// Publish time, used for newest-first ordering
    pub commit_time: DateTime<Utc>,

    /// Host runtime this update is compatible with
    pub runtime_version: String,

    /// All assets are recorded and the update may be launched
    pub is_ready: bool,

    /// Launches that completed without crashing
    pub successful_launch_count: u32,

    /// Launches that crashed before reporting success
    pub failed_launch_count: u32,

    /// Last time this update was selected for launch
    pub last_accessed: DateTime<Utc>,

    /// Opaque manifest metadata handed over by the fetcher
    pub manifest: Option<serde_json::Value>,
}

impl Update {
    /// Whether the rollback policy keeps this update out of the candidate list
    ///
    /// An update that launched successfully at least once stays launchable
    /// even if it has also crashed since.
    pub fn is_rolled_back(&self, failed_launch_threshold: u32) -> bool {
        self.successful_launch_count == 0
            && failed_launch_threshold > 0
            && self.failed_launch_count >= failed_launch_threshold
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {})",
            self.id,
            self.scope_key,
            self.commit_time.to_rfc3339()
        )
    }
}

/// An asset as referenced by one update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Content address or manifest-derived stable identifier
    pub key: String,

    /// Location under the asset root
    pub relative_path: String,

    /// SHA-256 hex of the content when `key` is not itself the hash
    pub expected_hash: Option<String>,

    /// MIME type or file extension reported by the manifest
    pub content_type: Option<String>,

    /// Name of the copy shipped inside the host binary, if any
    pub embedded_filename: Option<String>,

    /// When the catalog first recorded this asset
    pub download_time: DateTime<Utc>,

    /// Entry point bundle for the update this asset was loaded for
    pub is_launch_asset: bool,
}

impl Asset {
    /// The hash the on-disk bytes must match
    pub fn content_hash(&self) -> &str {
        self.expected_hash.as_deref().unwrap_or(&self.key)
    }
}

/// An update as committed by the fetcher
#[derive(Debug, Clone)]
pub struct NewUpdate {
    pub id: UpdateId,
    pub scope_key: String,
    pub commit_time: DateTime<Utc>,
    pub runtime_version: String,
    /// Defaults to true; a fetcher that stages downloads can commit a pending
    /// update and mark it ready later
    pub is_ready: bool,
    /// Initial access time, defaults to the commit moment
    pub last_accessed: DateTime<Utc>,
    pub manifest: Option<serde_json::Value>,
}

impl NewUpdate {
    /// Create a ready update record
    pub fn new(
        id: UpdateId,
        scope_key: impl Into<String>,
        commit_time: DateTime<Utc>,
        runtime_version: impl Into<String>,
    ) -> Self {
        Self {
            id,
            scope_key: scope_key.into(),
            commit_time,
            runtime_version: runtime_version.into(),
            is_ready: true,
            last_accessed: Utc::now(),
            manifest: None,
        }
    }

    /// Commit the update as not yet ready
    pub fn pending(mut self) -> Self {
        self.is_ready = false;
        self
    }

    /// Override the initial access time
    pub fn accessed_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_accessed = at;
        self
    }

    /// Attach manifest metadata
    pub fn with_manifest(mut self, manifest: serde_json::Value) -> Self {
        self.manifest = Some(manifest);
        self
    }
}

/// An asset as committed by the fetcher
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub key: String,
    pub relative_path: String,
    pub expected_hash: Option<String>,
    pub content_type: Option<String>,
    pub embedded_filename: Option<String>,
    pub is_launch_asset: bool,
}

impl NewAsset {
    /// Create an asset stored under its own key
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            relative_path: key.clone(),
            key,
            expected_hash: None,
            content_type: None,
            embedded_filename: None,
            is_launch_asset: false,
        }
    }

    /// Mark as the update's entry point bundle
    pub fn launch(mut self) -> Self {
        self.is_launch_asset = true;
        self
    }

    /// Store under a different path than the key
    pub fn at_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = relative_path.into();
        self
    }

    /// Verify against an explicit hash instead of the key
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.expected_hash = Some(hash.into());
        self
    }

    /// Record the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Record that a copy ships inside the host binary
    pub fn embedded_as(mut self, filename: impl Into<String>) -> Self {
        self.embedded_filename = Some(filename.into());
        self
    }
}
