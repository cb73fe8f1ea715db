//! Row types mapping catalog tables to domain records

use crate::error::{BundleCacheError, BundleCacheResult};
use crate::model::{Asset, Update};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub(crate) struct UpdateRow {
    pub id: String,
    pub scope_key: String,
    pub commit_time: i64,
    pub runtime_version: String,
    pub is_ready: bool,
    pub successful_launch_count: i64,
    pub failed_launch_count: i64,
    pub last_accessed: i64,
    pub manifest: Option<String>,
}

impl TryFrom<UpdateRow> for Update {
    type Error = BundleCacheError;

    fn try_from(row: UpdateRow) -> BundleCacheResult<Self> {
        let id = parse_id(&row.id)?;
        let manifest = row
            .manifest
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?;

        Ok(Update {
            id,
            scope_key: row.scope_key,
            commit_time: from_millis(row.commit_time),
            runtime_version: row.runtime_version,
            is_ready: row.is_ready,
            successful_launch_count: to_count(row.successful_launch_count),
            failed_launch_count: to_count(row.failed_launch_count),
            last_accessed: from_millis(row.last_accessed),
            manifest,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct AssetRow {
    pub key: String,
    pub relative_path: String,
    pub expected_hash: Option<String>,
    pub content_type: Option<String>,
    pub embedded_filename: Option<String>,
    pub download_time: i64,
    pub is_launch_asset: bool,
}

impl From<AssetRow> for Asset {
    fn from(row: AssetRow) -> Self {
        Asset {
            key: row.key,
            relative_path: row.relative_path,
            expected_hash: row.expected_hash,
            content_type: row.content_type,
            embedded_filename: row.embedded_filename,
            download_time: from_millis(row.download_time),
            is_launch_asset: row.is_launch_asset,
        }
    }
}

pub(crate) fn parse_id(raw: &str) -> BundleCacheResult<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| BundleCacheError::Internal(format!("malformed update id {raw:?}: {e}")))
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn to_count(raw: i64) -> u32 {
    u32::try_from(raw.max(0)).unwrap_or(u32::MAX)
}
