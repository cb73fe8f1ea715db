//! Byte providers consumed by `AssetStore::materialize`

use crate::error::{BundleCacheError, BundleCacheResult};
use crate::model::Asset;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;

/// Supplies the bytes of an asset being materialized
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Produce the full contents of `asset`
    async fn fetch(&self, asset: &Asset) -> BundleCacheResult<Bytes>;

    /// Short name used in logs
    fn describe(&self) -> String;
}

/// Bytes already held in memory, e.g. a completed download
pub struct InMemorySource(pub Bytes);

#[async_trait]
impl AssetSource for InMemorySource {
    async fn fetch(&self, _asset: &Asset) -> BundleCacheResult<Bytes> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        format!("memory ({} bytes)", self.0.len())
    }
}

/// A file on local disk, e.g. a resource shipped inside the host binary
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AssetSource for FileSource {
    async fn fetch(&self, asset: &Asset) -> BundleCacheResult<Bytes> {
        fs::read(&self.path)
            .await
            .map(Bytes::from)
            .map_err(|e| {
                BundleCacheError::asset_source(
                    &asset.key,
                    format!("reading {}: {}", self.path.display(), e),
                )
            })
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
