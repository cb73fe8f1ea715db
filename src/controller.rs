//! Entry point used by the host runtime
//!
//! Owns the catalog, asset store, embedded bundle and cache lock for one
//! cache root, and remembers which update this process launched so the
//! retention sweep never removes it.

use crate::catalog::{CatalogCounts, UpdateCatalog};
use crate::config::Config;
use crate::error::{BundleCacheError, BundleCacheResult};
use crate::launch::{
    EmbeddedBundle, FallbackReason, LaunchOutcome, LaunchPolicy, LaunchSelection, LaunchSelector,
    ShortCircuit,
};
use crate::lock::CacheLock;
use crate::model::{NewAsset, NewUpdate, UpdateId};
use crate::retention::{RetentionTracker, SweepReport};
use crate::store::AssetStore;
use chrono::Duration as ChronoDuration;
use std::sync::{Arc, Mutex};
use tokio::fs;
use tracing::{debug, info, warn};

pub struct UpdatesController {
    config: Config,
    catalog: Arc<UpdateCatalog>,
    store: Arc<AssetStore>,
    embedded: Arc<EmbeddedBundle>,
    selector: LaunchSelector,
    retention: RetentionTracker,
    lock: CacheLock,
    launched: Mutex<Option<UpdateId>>,
}

impl UpdatesController {
    /// Open (creating if needed) the cache rooted at `config.storage`
    pub async fn open(config: &Config) -> BundleCacheResult<Self> {
        let root = config.storage.root_dir();
        fs::create_dir_all(&root).await.map_err(|e| {
            BundleCacheError::io(format!("creating cache root {}", root.display()), e)
        })?;

        let catalog = Arc::new(
            UpdateCatalog::open(
                config.storage.database_path(),
                config.storage.busy_timeout(),
            )
            .await?,
        );
        let store = Arc::new(AssetStore::open(config.storage.assets_path()).await?);
        let embedded = Arc::new(EmbeddedBundle::new(
            config.launch.embedded_path(&config.storage),
        ));
        let lock = CacheLock::new();

        let selector = LaunchSelector::new(
            catalog.clone(),
            store.clone(),
            embedded.clone(),
            LaunchPolicy {
                failed_launch_threshold: config.launch.failed_launch_threshold,
            },
        );
        let retention = RetentionTracker::new(
            catalog.clone(),
            store.clone(),
            lock.clone(),
            config.retention.lock_timeout(),
        )
        .keep_previous(config.retention.keep_previous);

        info!("Opened update cache at {}", root.display());
        Ok(Self {
            config: config.clone(),
            catalog,
            store,
            embedded,
            selector,
            retention,
            lock,
            launched: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &UpdateCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    pub fn embedded(&self) -> &EmbeddedBundle {
        &self.embedded
    }

    /// Handle the host can trigger to abandon an in-flight selection
    pub fn short_circuit(&self) -> ShortCircuit {
        self.selector.short_circuit()
    }

    /// Update booted by this process, if any
    pub fn launched_update(&self) -> Option<UpdateId> {
        self.launched.lock().ok().and_then(|guard| *guard)
    }

    /// Record a downloaded update whose files are already materialized
    ///
    /// `launch_asset_key` designates the entry point among `assets`.
    pub async fn commit_update(
        &self,
        update: NewUpdate,
        mut assets: Vec<NewAsset>,
        launch_asset_key: &str,
    ) -> BundleCacheResult<()> {
        if !assets.iter().any(|a| a.key == launch_asset_key) {
            let err = BundleCacheError::validation(format!(
                "launch asset {launch_asset_key} is not among the update's assets"
            ));
            warn!("Rejected commit of update {}: {}", update.id, err);
            return Err(err);
        }
        for asset in &mut assets {
            asset.is_launch_asset = asset.key == launch_asset_key;
        }

        let _guard = self
            .lock
            .shared("commit", self.config.launch.lock_timeout())
            .await?;
        self.catalog
            .insert_update_with_assets(&update, &assets)
            .await
            .inspect_err(|e| {
                if e.is_contract_violation() {
                    warn!("Rejected commit of update {}: {}", update.id, e);
                }
            })
    }

    /// Choose the update to boot for a scope and runtime
    ///
    /// Only fails when the embedded update itself is unusable.
    pub async fn select_update_for_launch(
        &self,
        scope_key: &str,
        runtime_version: &str,
    ) -> BundleCacheResult<LaunchSelection> {
        Ok(self
            .select_with_report(scope_key, runtime_version)
            .await?
            .selection)
    }

    /// Like `select_update_for_launch`, keeping the selection report
    pub async fn select_with_report(
        &self,
        scope_key: &str,
        runtime_version: &str,
    ) -> BundleCacheResult<LaunchOutcome> {
        // Held until the launched update is recorded so a sweep waiting on
        // the exclusive side sees it as active.
        let guard = self
            .lock
            .shared("launch", self.config.launch.lock_timeout())
            .await;
        let outcome = match &guard {
            Ok(_) => self.select_bounded(scope_key, runtime_version).await?,
            Err(e) => {
                warn!("{}; launching embedded update", e);
                self.selector.fallback(FallbackReason::LockUnavailable).await?
            }
        };

        if let LaunchSelection::Cached { update, .. } = &outcome.selection {
            if let Err(e) = self.retention.stamp_access(update).await {
                warn!("Could not stamp access time for {}: {}", update.id, e);
            }
        }
        if let Ok(mut launched) = self.launched.lock() {
            *launched = Some(outcome.selection.update_id());
        }
        drop(guard);
        Ok(outcome)
    }

    async fn select_bounded(
        &self,
        scope_key: &str,
        runtime_version: &str,
    ) -> BundleCacheResult<LaunchOutcome> {
        let Some(budget) = self.config.launch.cold_start_timeout() else {
            return self.selector.select(scope_key, runtime_version).await;
        };

        match tokio::time::timeout(budget, self.selector.select(scope_key, runtime_version)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Launch selection exceeded {}ms, launching embedded update",
                    budget.as_millis()
                );
                self.selector.fallback(FallbackReason::TimedOut).await
            }
        }
    }

    /// Feed a launch outcome back into the rollback counters
    pub async fn report_launch_outcome(
        &self,
        update_id: UpdateId,
        success: bool,
    ) -> BundleCacheResult<()> {
        self.catalog.record_launch_outcome(update_id, success).await
    }

    pub async fn reset_launch_failures(&self, update_id: UpdateId) -> BundleCacheResult<()> {
        self.catalog.reset_launch_failures(update_id).await
    }

    /// Run the retention sweep with the configured window
    pub async fn sweep(&self) -> BundleCacheResult<SweepReport> {
        self.sweep_protecting(self.config.retention.window(), None)
            .await
    }

    /// Run the retention sweep
    ///
    /// `active` defaults to the update this process launched, read once the
    /// sweep holds the cache lock.
    pub async fn sweep_protecting(
        &self,
        window: ChronoDuration,
        active: Option<UpdateId>,
    ) -> BundleCacheResult<SweepReport> {
        self.retention
            .sweep_with(window, || {
                let active = active.or_else(|| self.launched_update());
                debug!("Sweeping with window {}, active update {:?}", window, active);
                active
            })
            .await
    }

    pub async fn counts(&self) -> BundleCacheResult<CatalogCounts> {
        self.catalog.counts().await
    }

    pub async fn close(&self) {
        self.catalog.close().await;
    }
}
