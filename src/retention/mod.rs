//! Access tracking and the retention sweep
//!
//! Every launch stamps the selected update's `last_accessed`. The sweep drops
//! updates not launched within the retention window, then deletes asset rows
//! and files no remaining update references, then clears stale temp files.

use crate::catalog::UpdateCatalog;
use crate::error::BundleCacheResult;
use crate::lock::CacheLock;
use crate::model::{Update, UpdateId};
use crate::store::AssetStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What one sweep removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub deleted_updates: Vec<UpdateId>,
    pub removed_asset_rows: u64,
    pub removed_files: u64,
    /// Orphaned rows whose file another asset still points at
    pub kept_shared_files: u64,
    pub removed_partials: u32,
    /// Files that could not be removed; their rows are retried next sweep
    pub errors: u64,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.deleted_updates.is_empty()
            && self.removed_asset_rows == 0
            && self.removed_files == 0
            && self.removed_partials == 0
    }
}

pub struct RetentionTracker {
    catalog: Arc<UpdateCatalog>,
    store: Arc<AssetStore>,
    lock: CacheLock,
    lock_timeout: Duration,
    keep_previous: u32,
}

impl RetentionTracker {
    pub fn new(
        catalog: Arc<UpdateCatalog>,
        store: Arc<AssetStore>,
        lock: CacheLock,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            store,
            lock,
            lock_timeout,
            keep_previous: 0,
        }
    }

    /// Also spare this many updates older than the active one in its scope
    pub fn keep_previous(mut self, count: u32) -> Self {
        self.keep_previous = count;
        self
    }

    /// Record that `update` was just launched
    pub async fn stamp_access(&self, update: &Update) -> BundleCacheResult<bool> {
        self.catalog.touch_last_accessed(update.id, Utc::now()).await
    }

    /// Sweep with the current time
    pub async fn sweep(
        &self,
        window: ChronoDuration,
        active: Option<UpdateId>,
    ) -> BundleCacheResult<SweepReport> {
        self.sweep_with(window, move || active).await
    }

    /// Sweep with the current time, asking for the active update only once
    /// the exclusive lock is held
    ///
    /// A launch that finished while the sweep waited is then visible to
    /// `active`.
    pub async fn sweep_with<F>(
        &self,
        window: ChronoDuration,
        active: F,
    ) -> BundleCacheResult<SweepReport>
    where
        F: FnOnce() -> Option<UpdateId>,
    {
        let _guard = self.lock.exclusive("sweep", self.lock_timeout).await?;
        self.sweep_locked(Utc::now(), window, active()).await
    }

    /// Sweep as if the clock read `now`
    ///
    /// Holds the cache lock exclusively for the whole pass.
    pub async fn sweep_at(
        &self,
        now: DateTime<Utc>,
        window: ChronoDuration,
        active: Option<UpdateId>,
    ) -> BundleCacheResult<SweepReport> {
        let _guard = self.lock.exclusive("sweep", self.lock_timeout).await?;
        self.sweep_locked(now, window, active).await
    }

    async fn sweep_locked(
        &self,
        now: DateTime<Utc>,
        window: ChronoDuration,
        active: Option<UpdateId>,
    ) -> BundleCacheResult<SweepReport> {
        let mut report = SweepReport::default();
        // Windows reaching past the earliest representable instant keep everything
        let cutoff = now
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let updates = self.catalog.all_updates().await?;
        let protected = self.protected_ids(&updates, active);

        for update in &updates {
            if protected.contains(&update.id) || update.last_accessed >= cutoff {
                continue;
            }
            debug!(
                "Update {} last launched {}, before cutoff {}",
                update.id, update.last_accessed, cutoff
            );
            self.catalog.delete_update(update.id, active).await?;
            report.deleted_updates.push(update.id);
        }

        for asset in self.catalog.list_orphaned_assets().await? {
            if self.catalog.path_in_use(&asset.relative_path).await? {
                report.kept_shared_files += 1;
            } else {
                match self.store.remove(&asset).await {
                    Ok(true) => report.removed_files += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Keeping row for {}: {}", asset.key, e);
                        report.errors += 1;
                        continue;
                    }
                }
            }
            if self.catalog.delete_orphaned_asset(&asset.key).await? {
                report.removed_asset_rows += 1;
            }
        }

        report.removed_partials = self.store.sweep_partials().await?;

        if report.is_empty() {
            debug!("Retention sweep found nothing to remove");
        } else {
            info!(
                "Retention sweep removed {} update(s), {} asset row(s), {} file(s), {} partial(s)",
                report.deleted_updates.len(),
                report.removed_asset_rows,
                report.removed_files,
                report.removed_partials
            );
        }
        Ok(report)
    }

    /// The active update plus the `keep_previous` newest older ones in its scope
    fn protected_ids(&self, updates: &[Update], active: Option<UpdateId>) -> HashSet<UpdateId> {
        let mut protected = HashSet::new();
        let Some(active_id) = active else {
            return protected;
        };
        protected.insert(active_id);

        let Some(current) = updates.iter().find(|u| u.id == active_id) else {
            return protected;
        };
        let mut older: Vec<&Update> = updates
            .iter()
            .filter(|u| u.scope_key == current.scope_key && u.commit_time < current.commit_time)
            .collect();
        older.sort_by(|a, b| b.commit_time.cmp(&a.commit_time).then(a.id.cmp(&b.id)));
        protected.extend(
            older
                .into_iter()
                .take(self.keep_previous as usize)
                .map(|u| u.id),
        );
        protected
    }
}
