//! Persistent catalog of updates and their assets
//!
//! Backed by SQLite. Updates and assets are linked through the
//! `update_assets` association table, which is the only structure that knows
//! an asset is shared between update generations. Every catalog mutation in
//! the crate goes through `UpdateCatalog`; multi-row changes run inside one
//! transaction so no half-inserted update is ever observable.

mod rows;
pub mod schema;

use crate::error::{BundleCacheError, BundleCacheResult};
use crate::model::{Asset, NewAsset, NewUpdate, Update, UpdateId};
use crate::store::validate_relative_path;
use chrono::{DateTime, Utc};
use rows::{parse_id, to_millis, AssetRow, UpdateRow};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Row counts for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogCounts {
    pub updates: u64,
    pub ready_updates: u64,
    pub assets: u64,
}

/// SQLite-backed update catalog
pub struct UpdateCatalog {
    pool: Pool<Sqlite>,
}

impl UpdateCatalog {
    /// Open (or create) the catalog database at `path`
    pub async fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> BundleCacheResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                BundleCacheError::io(format!("creating catalog directory {}", parent.display()), e)
            })?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(busy_timeout);

        // One connection: SQLite serializes writers anyway, and a single
        // connection keeps transactions from tripping over "database is locked".
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let catalog = Self { pool };
        catalog.migrate().await?;
        debug!("Opened catalog at {}", path.display());
        Ok(catalog)
    }

    /// Create tables and indexes if missing
    async fn migrate(&self) -> BundleCacheResult<()> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        if version > schema::SCHEMA_VERSION {
            return Err(BundleCacheError::Internal(format!(
                "catalog schema version {} is newer than supported version {}",
                version,
                schema::SCHEMA_VERSION
            )));
        }

        for statement in schema::CREATE_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        // PRAGMA does not accept bound parameters
        sqlx::query(&format!("PRAGMA user_version = {}", schema::SCHEMA_VERSION))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Close the underlying connection; later calls fail with a database error
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Atomically record an update, any new assets, and the associations
    pub async fn insert_update_with_assets(
        &self,
        update: &NewUpdate,
        assets: &[NewAsset],
    ) -> BundleCacheResult<()> {
        validate_insert(update, assets)?;

        let id = update.id.to_string();
        let manifest = update
            .manifest
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = to_millis(Utc::now());

        let mut tx = self.pool.begin().await?;

        let existing: Option<String> = sqlx::query_scalar("SELECT id FROM updates WHERE id = ?")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(BundleCacheError::Conflict(update.id));
        }

        sqlx::query(
            r#"
            INSERT INTO updates (id, scope_key, commit_time, runtime_version, is_ready, last_accessed, manifest)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&update.scope_key)
        .bind(to_millis(update.commit_time))
        .bind(&update.runtime_version)
        .bind(update.is_ready)
        .bind(to_millis(update.last_accessed))
        .bind(&manifest)
        .execute(&mut *tx)
        .await?;

        let mut reused = 0;
        for asset in assets {
            let result = sqlx::query(
                r#"
                INSERT INTO assets (key, relative_path, expected_hash, content_type, embedded_filename, download_time)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (key) DO NOTHING
                "#,
            )
            .bind(&asset.key)
            .bind(&asset.relative_path)
            .bind(&asset.expected_hash)
            .bind(&asset.content_type)
            .bind(&asset.embedded_filename)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                reused += 1;
            }

            sqlx::query(
                "INSERT INTO update_assets (update_id, asset_key, is_launch_asset) VALUES (?, ?, ?)",
            )
            .bind(&id)
            .bind(&asset.key)
            .bind(asset.is_launch_asset)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!(
            "Recorded update {} with {} asset(s), {} already cataloged",
            update.id,
            assets.len(),
            reused
        );
        Ok(())
    }

    /// Ready updates for a scope and runtime, newest first
    ///
    /// Ties on commit time are broken by id so the order is stable.
    pub async fn query_candidates(
        &self,
        scope_key: &str,
        runtime_version: &str,
    ) -> BundleCacheResult<Vec<Update>> {
        let rows: Vec<UpdateRow> = sqlx::query_as(
            r#"
            SELECT * FROM updates
            WHERE scope_key = ? AND runtime_version = ? AND is_ready = 1
            ORDER BY commit_time DESC, id ASC
            "#,
        )
        .bind(scope_key)
        .bind(runtime_version)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Update::try_from).collect()
    }

    /// Look up a single update
    pub async fn update(&self, update_id: UpdateId) -> BundleCacheResult<Option<Update>> {
        let row: Option<UpdateRow> = sqlx::query_as("SELECT * FROM updates WHERE id = ?")
            .bind(update_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Update::try_from).transpose()
    }

    /// Every update in the catalog, grouped by scope and newest first
    pub async fn all_updates(&self) -> BundleCacheResult<Vec<Update>> {
        let rows: Vec<UpdateRow> = sqlx::query_as(
            "SELECT * FROM updates ORDER BY scope_key ASC, commit_time DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Update::try_from).collect()
    }

    /// Assets of one update, launch asset first then by key
    pub async fn assets_for_update(&self, update_id: UpdateId) -> BundleCacheResult<Vec<Asset>> {
        let rows: Vec<AssetRow> = sqlx::query_as(
            r#"
            SELECT a.key, a.relative_path, a.expected_hash, a.content_type,
                   a.embedded_filename, a.download_time, ua.is_launch_asset
            FROM assets a
            INNER JOIN update_assets ua ON ua.asset_key = a.key
            WHERE ua.update_id = ?
            ORDER BY ua.is_launch_asset DESC, a.key ASC
            "#,
        )
        .bind(update_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Asset::from).collect())
    }

    /// Advance `last_accessed`; earlier or equal timestamps are ignored
    ///
    /// Returns whether the stored value changed.
    pub async fn touch_last_accessed(
        &self,
        update_id: UpdateId,
        timestamp: DateTime<Utc>,
    ) -> BundleCacheResult<bool> {
        let at = to_millis(timestamp);
        let result = sqlx::query(
            "UPDATE updates SET last_accessed = ? WHERE id = ? AND last_accessed < ?",
        )
        .bind(at)
        .bind(update_id.to_string())
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        self.ensure_exists(update_id).await?;
        Ok(false)
    }

    /// Remove an update and its associations
    ///
    /// `active` is the update currently booted by the host, which may never be
    /// deleted. Asset rows are left for the orphan sweep.
    pub async fn delete_update(
        &self,
        update_id: UpdateId,
        active: Option<UpdateId>,
    ) -> BundleCacheResult<()> {
        if active == Some(update_id) {
            warn!("Refusing to delete active update {}", update_id);
            return Err(BundleCacheError::Referential(update_id));
        }

        let id = update_id.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM update_assets WHERE update_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM updates WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BundleCacheError::UpdateNotFound(update_id));
        }

        tx.commit().await?;
        info!("Deleted update {}", update_id);
        Ok(())
    }

    /// Assets no update references any more, ordered by key
    ///
    /// A listed row may share its file with a live asset; check
    /// `path_in_use` before unlinking.
    pub async fn list_orphaned_assets(&self) -> BundleCacheResult<Vec<Asset>> {
        let rows: Vec<AssetRow> = sqlx::query_as(
            r#"
            SELECT a.key, a.relative_path, a.expected_hash, a.content_type,
                   a.embedded_filename, a.download_time, 0 AS is_launch_asset
            FROM assets a
            WHERE NOT EXISTS (SELECT 1 FROM update_assets ua WHERE ua.asset_key = a.key)
            ORDER BY a.key ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Asset::from).collect())
    }

    /// Whether a still-referenced asset lives at `relative_path`
    ///
    /// Two asset rows can point at one file; the file must outlive the
    /// orphaned row in that case.
    pub async fn path_in_use(&self, relative_path: &str) -> BundleCacheResult<bool> {
        let in_use: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM assets a
                INNER JOIN update_assets ua ON ua.asset_key = a.key
                WHERE a.relative_path = ?
            )
            "#,
        )
        .bind(relative_path)
        .fetch_one(&self.pool)
        .await?;
        Ok(in_use)
    }

    /// Delete an asset row if it is still unreferenced
    pub async fn delete_orphaned_asset(&self, key: &str) -> BundleCacheResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM assets
            WHERE key = ?
              AND NOT EXISTS (SELECT 1 FROM update_assets WHERE asset_key = ?)
            "#,
        )
        .bind(key)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count one launch outcome reported by the runtime
    pub async fn record_launch_outcome(
        &self,
        update_id: UpdateId,
        success: bool,
    ) -> BundleCacheResult<()> {
        let sql = if success {
            "UPDATE updates SET successful_launch_count = successful_launch_count + 1 WHERE id = ?"
        } else {
            "UPDATE updates SET failed_launch_count = failed_launch_count + 1 WHERE id = ?"
        };
        let result = sqlx::query(sql)
            .bind(update_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BundleCacheError::UpdateNotFound(update_id));
        }

        debug!(
            "Recorded {} launch for update {}",
            if success { "successful" } else { "failed" },
            update_id
        );
        Ok(())
    }

    /// Clear the failure counter so a rolled-back update becomes launchable again
    pub async fn reset_launch_failures(&self, update_id: UpdateId) -> BundleCacheResult<()> {
        let result = sqlx::query("UPDATE updates SET failed_launch_count = 0 WHERE id = ?")
            .bind(update_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BundleCacheError::UpdateNotFound(update_id));
        }
        info!("Reset launch failures for update {}", update_id);
        Ok(())
    }

    /// Updates that have crashed at least once, newest first
    pub async fn recent_failed_launches(&self, limit: u32) -> BundleCacheResult<Vec<UpdateId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM updates
            WHERE failed_launch_count > 0
            ORDER BY commit_time DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        ids.iter().map(|id| parse_id(id)).collect()
    }

    /// Flip a pending update to ready
    pub async fn mark_update_ready(&self, update_id: UpdateId) -> BundleCacheResult<()> {
        let result = sqlx::query("UPDATE updates SET is_ready = 1 WHERE id = ?")
            .bind(update_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BundleCacheError::UpdateNotFound(update_id));
        }
        Ok(())
    }

    /// Mark every update referencing any of `keys` as not ready
    ///
    /// Returns the number of updates that changed.
    pub async fn mark_assets_missing(&self, keys: &[String]) -> BundleCacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut changed = 0;
        for key in keys {
            let result = sqlx::query(
                r#"
                UPDATE updates SET is_ready = 0
                WHERE is_ready = 1
                  AND id IN (SELECT update_id FROM update_assets WHERE asset_key = ?)
                "#,
            )
            .bind(key)
            .execute(&mut *tx)
            .await?;
            changed += result.rows_affected();
        }
        tx.commit().await?;

        if changed > 0 {
            warn!(
                "Marked {} update(s) not ready after {} asset(s) went missing",
                changed,
                keys.len()
            );
        }
        Ok(changed)
    }

    /// Row counts for status output
    pub async fn counts(&self) -> BundleCacheResult<CatalogCounts> {
        let (updates, ready_updates): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(is_ready), 0) FROM updates",
        )
        .fetch_one(&self.pool)
        .await?;
        let assets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM assets")
            .fetch_one(&self.pool)
            .await?;

        Ok(CatalogCounts {
            updates: updates.max(0) as u64,
            ready_updates: ready_updates.max(0) as u64,
            assets: assets.max(0) as u64,
        })
    }

    async fn ensure_exists(&self, update_id: UpdateId) -> BundleCacheResult<()> {
        let found: Option<String> = sqlx::query_scalar("SELECT id FROM updates WHERE id = ?")
            .bind(update_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match found {
            Some(_) => Ok(()),
            None => Err(BundleCacheError::UpdateNotFound(update_id)),
        }
    }
}

/// Check an insert before opening a transaction
fn validate_insert(update: &NewUpdate, assets: &[NewAsset]) -> BundleCacheResult<()> {
    if update.scope_key.trim().is_empty() {
        return Err(BundleCacheError::validation("scope key is empty"));
    }
    if update.runtime_version.trim().is_empty() {
        return Err(BundleCacheError::validation("runtime version is empty"));
    }

    let launch_assets = assets.iter().filter(|a| a.is_launch_asset).count();
    if launch_assets != 1 {
        return Err(BundleCacheError::validation(format!(
            "update {} must have exactly one launch asset, found {}",
            update.id, launch_assets
        )));
    }

    let mut seen = HashSet::new();
    for asset in assets {
        if asset.key.is_empty() {
            return Err(BundleCacheError::validation("asset key is empty"));
        }
        if !seen.insert(asset.key.as_str()) {
            return Err(BundleCacheError::validation(format!(
                "asset {} listed twice",
                asset.key
            )));
        }
        validate_relative_path(&asset.relative_path)
            .map_err(|e| BundleCacheError::validation(e.to_string()))?;
    }
    Ok(())
}
