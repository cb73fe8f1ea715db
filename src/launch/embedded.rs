//! The update compiled into the host binary
//!
//! The embedded bundle is a directory holding `manifest.json` and the files it
//! lists. It is the selector's terminal fallback and a local source for
//! cached assets that went missing from the asset store.

use crate::error::{BundleCacheError, BundleCacheResult};
use crate::model::{Asset, UpdateId};
use crate::store::validate_relative_path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::debug;

/// Manifest file name inside the embedded directory
pub const MANIFEST_FILE: &str = "manifest.json";

/// Manifest of the embedded update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedManifest {
    pub id: UpdateId,
    pub commit_time: DateTime<Utc>,
    pub runtime_version: String,
    /// File name of the entry point bundle
    pub launch_asset: String,
    #[serde(default)]
    pub assets: Vec<EmbeddedAssetEntry>,
}

/// One file shipped in the embedded bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedAssetEntry {
    pub key: String,
    pub filename: String,
}

impl EmbeddedManifest {
    /// File name shipped for an asset key, if any
    pub fn filename_for_key(&self, key: &str) -> Option<&str> {
        self.assets
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.filename.as_str())
    }
}

/// Directory-backed embedded bundle with a lazily parsed manifest
#[derive(Debug)]
pub struct EmbeddedBundle {
    dir: PathBuf,
    manifest: OnceCell<EmbeddedManifest>,
}

impl EmbeddedBundle {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            manifest: OnceCell::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parse `manifest.json` on first use
    pub async fn manifest(&self) -> BundleCacheResult<&EmbeddedManifest> {
        self.manifest
            .get_or_try_init(|| async {
                let path = self.dir.join(MANIFEST_FILE);
                let content = fs::read_to_string(&path).await.map_err(|e| {
                    BundleCacheError::io(format!("reading embedded manifest {}", path.display()), e)
                })?;
                let manifest: EmbeddedManifest = serde_json::from_str(&content)?;
                debug!("Loaded embedded manifest for update {}", manifest.id);
                Ok::<_, BundleCacheError>(manifest)
            })
            .await
    }

    /// Absolute path of a file shipped in the bundle
    pub fn file_path(&self, filename: &str) -> BundleCacheResult<PathBuf> {
        validate_relative_path(filename)?;
        Ok(self.dir.join(filename))
    }

    /// Path of the embedded launch asset, checked to be a readable file
    pub async fn launch_asset_path(&self) -> BundleCacheResult<PathBuf> {
        let manifest = self.manifest().await?;
        let path = self.file_path(&manifest.launch_asset)?;

        let file = fs::File::open(&path).await.map_err(|e| {
            BundleCacheError::io(format!("opening embedded launch asset {}", path.display()), e)
        })?;
        let metadata = file.metadata().await.map_err(|e| {
            BundleCacheError::io(format!("inspecting embedded launch asset {}", path.display()), e)
        })?;
        if !metadata.is_file() {
            return Err(BundleCacheError::PathInvalid {
                path: path.display().to_string(),
                reason: "embedded launch asset is not a regular file".to_string(),
            });
        }
        Ok(path)
    }

    /// Embedded file that can stand in for a cached asset, if one ships
    ///
    /// An unreadable manifest only disables the key lookup; an explicit
    /// `embedded_filename` on the asset still applies.
    pub async fn filename_for(&self, asset: &Asset) -> Option<String> {
        if let Some(filename) = &asset.embedded_filename {
            return Some(filename.clone());
        }
        match self.manifest().await {
            Ok(manifest) => manifest.filename_for_key(&asset.key).map(str::to_string),
            Err(_) => None,
        }
    }
}
