//! Content-addressed asset store
//!
//! Asset blobs live under a single root directory at the catalog's
//! `relative_path`. Writers never touch the final path directly: bytes go to a
//! temp file in the same directory, are hashed again once durable, and are
//! renamed into place only on a match. A reader therefore sees either no file
//! or a complete one.
//!
//! # Verification outcomes
//!
//! | Outcome | Meaning |
//! |---------|---------|
//! | Present | File exists and hashes to the asset's content hash |
//! | Missing | No file at the asset's path |
//! | Corrupt | File exists but the hash differs |

pub mod hash;
pub mod source;

pub use hash::{hash_file, sha256_hex};
pub use source::{AssetSource, FileSource, InMemorySource};

use crate::error::{BundleCacheError, BundleCacheResult};
use crate::model::Asset;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Marker embedded in temp file names
const TEMP_MARKER: &str = ".tmp.";

/// Result of checking an asset on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyStatus {
    Present,
    Missing,
    Corrupt { actual: String },
}

impl fmt::Display for VerifyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Missing => write!(f, "missing"),
            Self::Corrupt { .. } => write!(f, "corrupt"),
        }
    }
}

/// Reject relative paths that could escape the asset root
pub fn validate_relative_path(relative_path: &str) -> BundleCacheResult<()> {
    let invalid = |reason: &str| BundleCacheError::PathInvalid {
        path: relative_path.to_string(),
        reason: reason.to_string(),
    };

    if relative_path.is_empty() {
        return Err(invalid("empty path"));
    }
    if relative_path.starts_with('/') || relative_path.starts_with('\\') {
        return Err(invalid("absolute paths are not allowed"));
    }
    if relative_path.contains(TEMP_MARKER) {
        return Err(invalid("reserved for temp files"));
    }
    for component in Path::new(relative_path).components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(invalid("only plain path components are allowed"));
        }
    }
    Ok(())
}

/// On-disk blob store rooted at one directory
#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    /// Open the store, creating the root directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> BundleCacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            BundleCacheError::io(format!("creating asset root {}", root.display()), e)
        })?;
        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of an asset's materialized file
    pub fn path_for(&self, asset: &Asset) -> BundleCacheResult<PathBuf> {
        validate_relative_path(&asset.relative_path)?;
        Ok(self.root.join(&asset.relative_path))
    }

    /// Check whether the asset's file exists and matches its content hash
    pub async fn verify_present(&self, asset: &Asset) -> BundleCacheResult<VerifyStatus> {
        let path = self.path_for(asset)?;

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VerifyStatus::Missing)
            }
            Err(e) => {
                return Err(BundleCacheError::io(
                    format!("inspecting {}", path.display()),
                    e,
                ))
            }
        };
        if !metadata.is_file() {
            return Ok(VerifyStatus::Corrupt {
                actual: "not a regular file".to_string(),
            });
        }

        let status = match hash_file(&path).await? {
            None => VerifyStatus::Missing,
            Some(actual) if hash::hashes_match(asset.content_hash(), &actual) => {
                VerifyStatus::Present
            }
            Some(actual) => VerifyStatus::Corrupt { actual },
        };

        debug!("Asset {} is {}", asset.key, status);
        Ok(status)
    }

    /// Write an asset's bytes into place atomically
    ///
    /// Already-valid files are left untouched. On any failure the destination
    /// is unchanged and no temp file remains.
    pub async fn materialize(
        &self,
        asset: &Asset,
        source: &dyn AssetSource,
    ) -> BundleCacheResult<PathBuf> {
        let path = self.path_for(asset)?;
        if self.verify_present(asset).await? == VerifyStatus::Present {
            debug!("Asset {} already materialized", asset.key);
            return Ok(path);
        }

        let bytes = source.fetch(asset).await?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                BundleCacheError::io(format!("creating directory {}", parent.display()), e)
            })?;
        }

        let temp_path = temp_path_for(&path);
        if let Err(e) = write_durably(&temp_path, &bytes).await {
            discard(&temp_path).await;
            return Err(e);
        }

        let actual = match hash_file(&temp_path).await {
            Ok(Some(actual)) => actual,
            Ok(None) => {
                return Err(BundleCacheError::Internal(format!(
                    "temp file {} vanished before verification",
                    temp_path.display()
                )))
            }
            Err(e) => {
                discard(&temp_path).await;
                return Err(e);
            }
        };

        if !hash::hashes_match(asset.content_hash(), &actual) {
            discard(&temp_path).await;
            warn!(
                "Discarding {} from {}: hash mismatch",
                asset.key,
                source.describe()
            );
            return Err(BundleCacheError::Corruption {
                key: asset.key.clone(),
                expected: asset.content_hash().to_string(),
                actual,
            });
        }

        if let Err(e) = fs::rename(&temp_path, &path).await {
            discard(&temp_path).await;
            return Err(BundleCacheError::io(
                format!("renaming into {}", path.display()),
                e,
            ));
        }

        info!("Materialized {} from {}", asset.key, source.describe());
        Ok(path)
    }

    /// Delete an asset's file; returns whether a file was removed
    pub async fn remove(&self, asset: &Asset) -> BundleCacheResult<bool> {
        let path = self.path_for(asset)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BundleCacheError::io(
                format!("removing {}", path.display()),
                e,
            )),
        }
    }

    /// Delete temp files left behind by interrupted materializations
    ///
    /// Must not run concurrently with `materialize`.
    pub async fn sweep_partials(&self) -> BundleCacheResult<u32> {
        let mut removed = 0;
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(|e| {
                BundleCacheError::io(format!("reading directory {}", dir.display()), e)
            })?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| BundleCacheError::io("reading directory entry", e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| BundleCacheError::io(format!("inspecting {}", path.display()), e))?;

                if file_type.is_dir() {
                    pending.push(path);
                } else if entry.file_name().to_string_lossy().contains(TEMP_MARKER) {
                    match fs::remove_file(&path).await {
                        Ok(()) => removed += 1,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            return Err(BundleCacheError::io(
                                format!("removing partial {}", path.display()),
                                e,
                            ))
                        }
                    }
                }
            }
        }

        if removed > 0 {
            info!("Removed {} partial asset file(s)", removed);
        }
        Ok(removed)
    }
}

/// Unique sibling path for an in-progress write
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}{}", name, TEMP_MARKER, Uuid::new_v4()))
}

async fn write_durably(path: &Path, bytes: &[u8]) -> BundleCacheResult<()> {
    let context = || format!("writing {}", path.display());
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| BundleCacheError::io(context(), e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| BundleCacheError::io(context(), e))?;
    file.sync_all()
        .await
        .map_err(|e| BundleCacheError::io(context(), e))?;
    Ok(())
}

async fn discard(temp_path: &Path) {
    if let Err(e) = fs::remove_file(temp_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove temp file {}: {}", temp_path.display(), e);
        }
    }
}
