//! Picks the update the host boots
//!
//! Candidates come from the catalog newest first. Each is checked against
//! the rollback rule and then file by file against the asset store. The first
//! one that passes wins. When none does, or anything upstream of
//! verification fails, the embedded update is launched instead.

use super::embedded::EmbeddedBundle;
use super::state::{FallbackReason, LaunchReport, LaunchState, Rejection};
use super::LaunchSelection;
use crate::catalog::UpdateCatalog;
use crate::error::{BundleCacheError, BundleCacheResult};
use crate::model::{Asset, Update};
use crate::store::{AssetStore, FileSource, VerifyStatus};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tunables for candidate filtering
#[derive(Debug, Clone, Copy)]
pub struct LaunchPolicy {
    /// Failed launches, with no success, after which an update is skipped; 0 disables
    pub failed_launch_threshold: u32,
}

impl Default for LaunchPolicy {
    fn default() -> Self {
        Self {
            failed_launch_threshold: 1,
        }
    }
}

/// Handle the host flips to abandon selection and boot the embedded update
#[derive(Debug, Clone, Default)]
pub struct ShortCircuit(Arc<AtomicBool>);

impl ShortCircuit {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Final selection plus the record of how it was reached
#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    pub selection: LaunchSelection,
    pub report: LaunchReport,
}

/// Outcome of verifying one candidate
enum Verdict {
    Accept(PathBuf),
    Reject(Rejection),
}

pub struct LaunchSelector {
    catalog: Arc<UpdateCatalog>,
    store: Arc<AssetStore>,
    embedded: Arc<EmbeddedBundle>,
    policy: LaunchPolicy,
    short_circuit: ShortCircuit,
}

impl LaunchSelector {
    pub fn new(
        catalog: Arc<UpdateCatalog>,
        store: Arc<AssetStore>,
        embedded: Arc<EmbeddedBundle>,
        policy: LaunchPolicy,
    ) -> Self {
        Self {
            catalog,
            store,
            embedded,
            policy,
            short_circuit: ShortCircuit::default(),
        }
    }

    pub fn policy(&self) -> LaunchPolicy {
        self.policy
    }

    pub fn short_circuit(&self) -> ShortCircuit {
        self.short_circuit.clone()
    }

    /// Run the state machine to completion
    ///
    /// Errors only with `Fatal`, when even the embedded update is unusable.
    pub async fn select(
        &self,
        scope_key: &str,
        runtime_version: &str,
    ) -> BundleCacheResult<LaunchOutcome> {
        self.run(LaunchState::Idle, scope_key, runtime_version).await
    }

    /// Skip the catalog entirely and resolve the embedded update
    pub async fn fallback(&self, reason: FallbackReason) -> BundleCacheResult<LaunchOutcome> {
        self.run(LaunchState::fallback(reason), "", "").await
    }

    async fn run(
        &self,
        initial: LaunchState,
        scope_key: &str,
        runtime_version: &str,
    ) -> BundleCacheResult<LaunchOutcome> {
        let mut report = LaunchReport::default();
        let mut state = initial;
        report.transitions.push(state.name());

        while !state.is_terminal() {
            state = if self.short_circuit.is_triggered() && !state.is_fallback() {
                info!("Launch selection short-circuited by host");
                LaunchState::fallback(FallbackReason::ShortCircuit)
            } else {
                self.step(state, scope_key, runtime_version, &mut report).await
            };
            report.transitions.push(state.name());
        }

        match state {
            LaunchState::Selected {
                update,
                launch_asset_path,
            } => {
                info!(
                    "Selected cached update {} ({} candidate(s), {} rejected)",
                    update.id,
                    report.candidates,
                    report.rejected.len()
                );
                Ok(LaunchOutcome {
                    selection: LaunchSelection::Cached {
                        update,
                        launch_asset_path,
                    },
                    report,
                })
            }
            LaunchState::Fallback {
                reason,
                launch_asset_path: Some(launch_asset_path),
            } => {
                let manifest = self.embedded.manifest().await?.clone();
                info!("Launching embedded update {}: {}", manifest.id, reason);
                Ok(LaunchOutcome {
                    selection: LaunchSelection::Embedded {
                        manifest,
                        launch_asset_path,
                        reason,
                    },
                    report,
                })
            }
            LaunchState::Fatal { reason } => Err(BundleCacheError::Fatal(reason)),
            other => Err(BundleCacheError::Internal(format!(
                "selection stopped in non-terminal state {}",
                other.name()
            ))),
        }
    }

    async fn step(
        &self,
        state: LaunchState,
        scope_key: &str,
        runtime_version: &str,
        report: &mut LaunchReport,
    ) -> LaunchState {
        match state {
            LaunchState::Idle => LaunchState::Selecting,
            LaunchState::Selecting => {
                self.load_candidates(scope_key, runtime_version, report)
                    .await
            }
            LaunchState::Verifying {
                candidate,
                remaining,
            } => self.verify_candidate(candidate, remaining, report).await,
            LaunchState::Fallback {
                reason,
                launch_asset_path: None,
            } => self.resolve_embedded(reason).await,
            terminal => terminal,
        }
    }

    async fn load_candidates(
        &self,
        scope_key: &str,
        runtime_version: &str,
        report: &mut LaunchReport,
    ) -> LaunchState {
        let candidates = match self
            .catalog
            .query_candidates(scope_key, runtime_version)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Catalog query failed, falling back to embedded: {}", e);
                return LaunchState::fallback(FallbackReason::CatalogUnavailable(e.to_string()));
            }
        };
        report.candidates = candidates.len();

        let threshold = self.policy.failed_launch_threshold;
        let mut launchable = VecDeque::with_capacity(candidates.len());
        for update in candidates {
            if update.is_rolled_back(threshold) {
                debug!("Skipping rolled-back update {}", update.id);
                report.rejected.push((
                    update.id,
                    Rejection::RolledBack {
                        failed_launches: update.failed_launch_count,
                    },
                ));
            } else {
                launchable.push_back(update);
            }
        }

        next_candidate(launchable)
    }

    async fn verify_candidate(
        &self,
        candidate: Update,
        remaining: VecDeque<Update>,
        report: &mut LaunchReport,
    ) -> LaunchState {
        match self.check_files(&candidate, report).await {
            Verdict::Accept(launch_asset_path) => LaunchState::Selected {
                update: candidate,
                launch_asset_path,
            },
            Verdict::Reject(rejection) => {
                warn!("Rejecting update {}: {}", candidate.id, rejection);
                if let Some(key) = rejection.broken_key() {
                    match self.catalog.mark_assets_missing(&[key.to_string()]).await {
                        Ok(changed) => report.marked_not_ready += changed,
                        Err(e) => warn!("Could not flag updates using {}: {}", key, e),
                    }
                }
                report.rejected.push((candidate.id, rejection));
                next_candidate(remaining)
            }
        }
    }

    async fn check_files(&self, candidate: &Update, report: &mut LaunchReport) -> Verdict {
        let assets = match self.catalog.assets_for_update(candidate.id).await {
            Ok(assets) => assets,
            Err(e) => {
                return Verdict::Reject(Rejection::Unreadable {
                    key: None,
                    reason: e.to_string(),
                })
            }
        };

        let Some(launch_asset) = assets.iter().find(|a| a.is_launch_asset) else {
            return Verdict::Reject(Rejection::NoLaunchAsset);
        };
        let launch_asset_path = match self.store.path_for(launch_asset) {
            Ok(path) => path,
            Err(e) => {
                return Verdict::Reject(Rejection::Unreadable {
                    key: Some(launch_asset.key.clone()),
                    reason: e.to_string(),
                })
            }
        };

        for asset in &assets {
            let status = match self.store.verify_present(asset).await {
                Ok(status) => status,
                Err(e) => {
                    return Verdict::Reject(Rejection::Unreadable {
                        key: Some(asset.key.clone()),
                        reason: e.to_string(),
                    })
                }
            };

            match status {
                VerifyStatus::Present => {}
                VerifyStatus::Corrupt { actual } => {
                    debug!(
                        "Asset {} hashes to {}, expected {}",
                        asset.key,
                        actual,
                        asset.content_hash()
                    );
                    return Verdict::Reject(Rejection::CorruptAsset {
                        key: asset.key.clone(),
                    });
                }
                VerifyStatus::Missing => {
                    if !self.repair_from_embedded(asset).await {
                        return Verdict::Reject(Rejection::MissingAsset {
                            key: asset.key.clone(),
                        });
                    }
                    report.repaired.push(asset.key.clone());
                }
            }
        }

        Verdict::Accept(launch_asset_path)
    }

    /// Copy a missing asset back from the embedded bundle when it ships one
    async fn repair_from_embedded(&self, asset: &Asset) -> bool {
        let Some(filename) = self.embedded.filename_for(asset).await else {
            return false;
        };
        let path = match self.embedded.file_path(&filename) {
            Ok(path) => path,
            Err(e) => {
                debug!("Embedded file name {} rejected: {}", filename, e);
                return false;
            }
        };

        match self.store.materialize(asset, &FileSource::new(path)).await {
            Ok(_) => {
                info!("Restored asset {} from embedded bundle", asset.key);
                true
            }
            Err(e) => {
                warn!("Could not restore asset {} from embedded bundle: {}", asset.key, e);
                false
            }
        }
    }

    async fn resolve_embedded(&self, reason: FallbackReason) -> LaunchState {
        match self.embedded.launch_asset_path().await {
            Ok(path) => LaunchState::Fallback {
                reason,
                launch_asset_path: Some(path),
            },
            Err(e) => LaunchState::Fatal {
                reason: format!("embedded update unusable ({reason}): {e}"),
            },
        }
    }
}

fn next_candidate(mut remaining: VecDeque<Update>) -> LaunchState {
    match remaining.pop_front() {
        Some(candidate) => LaunchState::Verifying {
            candidate,
            remaining,
        },
        None => LaunchState::fallback(FallbackReason::NoCandidates),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launch::embedded::MANIFEST_FILE;
    use crate::model::{NewAsset, NewUpdate};
    use crate::store::sha256_hex;
    use chrono::{TimeZone, Utc};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        _dir: TempDir,
        catalog: Arc<UpdateCatalog>,
        store: Arc<AssetStore>,
        embedded_dir: PathBuf,
        selector: LaunchSelector,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(
            UpdateCatalog::open(dir.path().join("catalog.db"), Duration::from_secs(1))
                .await
                .unwrap(),
        );
        let store = Arc::new(AssetStore::open(dir.path().join("assets")).await.unwrap());

        let embedded_dir = dir.path().join("embedded");
        std::fs::create_dir_all(&embedded_dir).unwrap();
        let manifest = serde_json::json!({
            "id": Uuid::from_u128(99),
            "commitTime": "2024-01-01T00:00:00Z",
            "runtimeVersion": "1.0",
            "launchAsset": "app.bundle",
            "assets": [{"key": sha256_hex(b"shared font"), "filename": "font.ttf"}]
        });
        std::fs::write(embedded_dir.join(MANIFEST_FILE), manifest.to_string()).unwrap();
        std::fs::write(embedded_dir.join("app.bundle"), b"embedded js").unwrap();
        std::fs::write(embedded_dir.join("font.ttf"), b"shared font").unwrap();

        let embedded = Arc::new(EmbeddedBundle::new(&embedded_dir));
        let selector = LaunchSelector::new(
            catalog.clone(),
            store.clone(),
            embedded,
            LaunchPolicy::default(),
        );
        Fixture {
            _dir: dir,
            catalog,
            store,
            embedded_dir,
            selector,
        }
    }

    fn write_asset(root: &Path, content: &[u8]) -> String {
        let key = sha256_hex(content);
        std::fs::write(root.join(&key), content).unwrap();
        key
    }

    async fn commit(f: &Fixture, commit_secs: i64, launch: &str, others: &[&str]) -> Uuid {
        let update = NewUpdate::new(
            Uuid::new_v4(),
            "app",
            Utc.timestamp_opt(commit_secs, 0).unwrap(),
            "1.0",
        );
        let mut assets = vec![NewAsset::new(launch).launch()];
        assets.extend(others.iter().map(|k| NewAsset::new(*k)));
        f.catalog
            .insert_update_with_assets(&update, &assets)
            .await
            .unwrap();
        update.id
    }

    fn cached_id(outcome: &LaunchOutcome) -> Option<Uuid> {
        match &outcome.selection {
            LaunchSelection::Cached { update, .. } => Some(update.id),
            LaunchSelection::Embedded { .. } => None,
        }
    }

    #[tokio::test]
    async fn newer_update_with_missing_file_is_skipped() {
        let f = fixture().await;
        let x = write_asset(f.store.root(), b"launch x");
        let y = write_asset(f.store.root(), b"asset y");
        let z = sha256_hex(b"asset z never written");

        let a = commit(&f, 10, &x, &[&y]).await;
        let b = commit(&f, 20, &x, &[&z]).await;

        let outcome = f.selector.select("app", "1.0").await.unwrap();
        assert_eq!(cached_id(&outcome), Some(a));
        assert_eq!(
            outcome.selection.launch_asset_path(),
            f.store.root().join(&x)
        );
        assert_eq!(
            outcome.report.rejected,
            vec![(b, Rejection::MissingAsset { key: z.clone() })]
        );
        assert_eq!(outcome.report.marked_not_ready, 1);
        assert!(!f.catalog.update(b).await.unwrap().unwrap().is_ready);
    }

    #[tokio::test]
    async fn selection_is_deterministic() {
        let f = fixture().await;
        let x = write_asset(f.store.root(), b"launch x");
        commit(&f, 10, &x, &[]).await;
        let newest = commit(&f, 20, &x, &[]).await;

        let first = f.selector.select("app", "1.0").await.unwrap();
        let second = f.selector.select("app", "1.0").await.unwrap();
        assert_eq!(cached_id(&first), Some(newest));
        assert_eq!(cached_id(&first), cached_id(&second));
    }

    #[tokio::test]
    async fn empty_catalog_falls_back_to_embedded() {
        let f = fixture().await;

        let outcome = f.selector.select("app", "1.0").await.unwrap();
        match outcome.selection {
            LaunchSelection::Embedded {
                manifest,
                launch_asset_path,
                reason,
            } => {
                assert_eq!(manifest.id, Uuid::from_u128(99));
                assert_eq!(launch_asset_path, f.embedded_dir.join("app.bundle"));
                assert_eq!(reason, FallbackReason::NoCandidates);
            }
            other => panic!("expected embedded launch, got {other:?}"),
        }
        assert_eq!(
            outcome.report.transitions,
            vec!["idle", "selecting", "fallback", "fallback"]
        );
    }

    #[tokio::test]
    async fn closed_catalog_falls_back_to_embedded() {
        let f = fixture().await;
        f.catalog.close().await;

        let outcome = f.selector.select("app", "1.0").await.unwrap();
        assert!(matches!(
            outcome.selection,
            LaunchSelection::Embedded {
                reason: FallbackReason::CatalogUnavailable(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unreadable_embedded_update_is_fatal() {
        let f = fixture().await;
        std::fs::remove_file(f.embedded_dir.join("app.bundle")).unwrap();

        let err = f.selector.select("app", "1.0").await.unwrap_err();
        assert!(matches!(err, BundleCacheError::Fatal(_)));
    }

    #[tokio::test]
    async fn rolled_back_update_is_excluded() {
        let f = fixture().await;
        let x = write_asset(f.store.root(), b"launch x");
        let good = commit(&f, 10, &x, &[]).await;
        let crashed = commit(&f, 20, &x, &[]).await;
        f.catalog.record_launch_outcome(crashed, false).await.unwrap();

        let outcome = f.selector.select("app", "1.0").await.unwrap();
        assert_eq!(cached_id(&outcome), Some(good));
        assert_eq!(
            outcome.report.rejected,
            vec![(crashed, Rejection::RolledBack { failed_launches: 1 })]
        );

        f.catalog.reset_launch_failures(crashed).await.unwrap();
        let outcome = f.selector.select("app", "1.0").await.unwrap();
        assert_eq!(cached_id(&outcome), Some(crashed));
    }

    #[tokio::test]
    async fn update_with_a_success_survives_later_failures() {
        let f = fixture().await;
        let x = write_asset(f.store.root(), b"launch x");
        let id = commit(&f, 10, &x, &[]).await;
        f.catalog.record_launch_outcome(id, true).await.unwrap();
        f.catalog.record_launch_outcome(id, false).await.unwrap();
        f.catalog.record_launch_outcome(id, false).await.unwrap();

        let outcome = f.selector.select("app", "1.0").await.unwrap();
        assert_eq!(cached_id(&outcome), Some(id));
    }

    #[tokio::test]
    async fn missing_asset_is_restored_from_embedded_bundle() {
        let f = fixture().await;
        let x = write_asset(f.store.root(), b"launch x");
        let font = sha256_hex(b"shared font");
        let id = commit(&f, 10, &x, &[&font]).await;

        let outcome = f.selector.select("app", "1.0").await.unwrap();
        assert_eq!(cached_id(&outcome), Some(id));
        assert_eq!(outcome.report.repaired, vec![font.clone()]);
        assert_eq!(
            std::fs::read(f.store.root().join(&font)).unwrap(),
            b"shared font"
        );
    }

    #[tokio::test]
    async fn corrupt_asset_rejects_candidate() {
        let f = fixture().await;
        let x = write_asset(f.store.root(), b"launch x");
        let y = sha256_hex(b"expected y");
        std::fs::write(f.store.root().join(&y), b"tampered").unwrap();
        let id = commit(&f, 10, &x, &[&y]).await;

        let outcome = f.selector.select("app", "1.0").await.unwrap();
        assert!(outcome.selection.is_embedded());
        assert_eq!(
            outcome.report.rejected,
            vec![(id, Rejection::CorruptAsset { key: y })]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_catalog() {
        let f = fixture().await;
        let x = write_asset(f.store.root(), b"launch x");
        commit(&f, 10, &x, &[]).await;

        f.selector.short_circuit().trigger();
        let outcome = f.selector.select("app", "1.0").await.unwrap();
        assert!(matches!(
            outcome.selection,
            LaunchSelection::Embedded {
                reason: FallbackReason::ShortCircuit,
                ..
            }
        ));
        assert_eq!(outcome.report.candidates, 0);
    }

    #[tokio::test]
    async fn explicit_fallback_resolves_embedded() {
        let f = fixture().await;
        let outcome = f
            .selector
            .fallback(FallbackReason::LockUnavailable)
            .await
            .unwrap();
        assert!(outcome.selection.is_embedded());
        assert_eq!(outcome.selection.update_id(), Uuid::from_u128(99));
    }
}
