//! Integration tests for bundlecache

use std::path::Path;
use uuid::Uuid;

/// Write an embedded bundle under `dir` and return its update id
fn write_embedded(dir: &Path) -> Uuid {
    let id = Uuid::from_u128(0xE3BE_DDED);
    std::fs::create_dir_all(dir).unwrap();
    let manifest = serde_json::json!({
        "id": id,
        "commitTime": "2024-01-01T00:00:00Z",
        "runtimeVersion": "1.0",
        "launchAsset": "app.bundle",
        "assets": []
    });
    std::fs::write(dir.join("manifest.json"), manifest.to_string()).unwrap();
    std::fs::write(dir.join("app.bundle"), b"embedded bundle").unwrap();
    id
}

mod cli_tests {
    use super::write_embedded;
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn bundlecache() -> Command {
        let mut cmd = cargo_bin_cmd!("bundlecache");
        cmd.env_remove("BUNDLECACHE_ROOT").env_remove("RUST_LOG");
        cmd
    }

    /// Config file pointing the cache root at a temp dir
    fn sandbox() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        let config = format!(
            "[storage]\nroot = {:?}\n\n[launch]\nscope_key = \"app\"\nruntime_version = \"1.0\"\n",
            dir.path().join("cache").display().to_string()
        );
        std::fs::write(&config_path, config).unwrap();
        (dir, config_path)
    }

    #[test]
    fn help_displays() {
        bundlecache()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("launch selection and asset cache"));
    }

    #[test]
    fn version_displays() {
        bundlecache()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("bundlecache"));
    }

    #[test]
    fn list_empty() {
        let (_dir, config) = sandbox();
        bundlecache()
            .arg("--config")
            .arg(&config)
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("No cached updates"));
    }

    #[test]
    fn list_empty_json() {
        let (_dir, config) = sandbox();
        bundlecache()
            .arg("--config")
            .arg(&config)
            .args(["list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn select_falls_back_to_embedded() {
        let (dir, config) = sandbox();
        write_embedded(&dir.path().join("cache").join("embedded"));

        bundlecache()
            .arg("--config")
            .arg(&config)
            .args(["select", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("app.bundle"));
    }

    #[test]
    fn select_without_embedded_bundle_fails() {
        let (_dir, config) = sandbox();
        bundlecache()
            .arg("--config")
            .arg(&config)
            .arg("select")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No bootable update found"));
    }

    #[test]
    fn report_unknown_update() {
        let (_dir, config) = sandbox();
        bundlecache()
            .arg("--config")
            .arg(&config)
            .args(["report", "00000000-0000-0000-0000-000000000001", "--failure"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Update not found"));
    }

    #[test]
    fn report_requires_outcome_flag() {
        bundlecache()
            .args(["report", "00000000-0000-0000-0000-000000000001"])
            .assert()
            .failure();
    }

    #[test]
    fn sweep_empty_cache() {
        let (_dir, config) = sandbox();
        bundlecache()
            .arg("--config")
            .arg(&config)
            .args(["sweep", "--window-days", "0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Nothing to remove"));
    }

    #[test]
    fn status_runs() {
        let (dir, config) = sandbox();
        write_embedded(&dir.path().join("cache").join("embedded"));

        bundlecache()
            .arg("--config")
            .arg(&config)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("0 update(s)"));
    }

    #[test]
    fn config_path() {
        let (_dir, config) = sandbox();
        bundlecache()
            .arg("--config")
            .arg(&config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let (_dir, config) = sandbox();
        bundlecache()
            .arg("--config")
            .arg(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[retention]"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("config.toml");
        std::fs::write(&config, "[launch\n").unwrap();

        bundlecache()
            .arg("--config")
            .arg(&config)
            .arg("list")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }
}

mod launch_tests {
    use super::write_embedded;
    use bundlecache::config::Config;
    use bundlecache::launch::FallbackReason;
    use bundlecache::model::{Asset, NewAsset, NewUpdate};
    use bundlecache::store::{sha256_hex, InMemorySource};
    use bundlecache::{BundleCacheError, LaunchSelection, UpdatesController};
    use bytes::Bytes;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn config_for(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.root = Some(dir.path().to_path_buf());
        config.launch.scope_key = "app".to_string();
        config.launch.runtime_version = "1.0".to_string();
        config
    }

    async fn open(dir: &TempDir) -> UpdatesController {
        write_embedded(&dir.path().join("embedded"));
        UpdatesController::open(&config_for(dir)).await.unwrap()
    }

    /// Download an asset into the store, returning its key
    async fn download(controller: &UpdatesController, content: &'static [u8]) -> String {
        let key = sha256_hex(content);
        let asset = Asset {
            key: key.clone(),
            relative_path: key.clone(),
            expected_hash: None,
            content_type: None,
            embedded_filename: None,
            download_time: Utc::now(),
            is_launch_asset: false,
        };
        controller
            .store()
            .materialize(&asset, &InMemorySource(Bytes::from_static(content)))
            .await
            .unwrap();
        key
    }

    fn update(commit_secs: i64) -> NewUpdate {
        NewUpdate::new(
            Uuid::new_v4(),
            "app",
            Utc.timestamp_opt(commit_secs, 0).unwrap(),
            "1.0",
        )
    }

    fn cached_id(selection: &LaunchSelection) -> Option<Uuid> {
        match selection {
            LaunchSelection::Cached { update, .. } => Some(update.id),
            LaunchSelection::Embedded { .. } => None,
        }
    }

    #[tokio::test]
    async fn newest_complete_update_wins() {
        let dir = TempDir::new().unwrap();
        let controller = open(&dir).await;
        let x = download(&controller, b"bundle x").await;
        let y = download(&controller, b"image y").await;
        let z = sha256_hex(b"image z, never downloaded");

        let long_ago = Utc.timestamp_opt(5, 0).unwrap();
        let a = update(1_000).accessed_at(long_ago);
        let b = update(2_000);
        controller
            .commit_update(a.clone(), vec![NewAsset::new(&x), NewAsset::new(&y)], &x)
            .await
            .unwrap();
        controller
            .commit_update(b.clone(), vec![NewAsset::new(&x), NewAsset::new(&z)], &x)
            .await
            .unwrap();

        let selection = controller.select_update_for_launch("app", "1.0").await.unwrap();
        assert_eq!(cached_id(&selection), Some(a.id));
        assert_eq!(
            selection.launch_asset_path(),
            controller.store().root().join(&x)
        );
        assert_eq!(controller.launched_update(), Some(a.id));

        let stamped = controller.catalog().update(a.id).await.unwrap().unwrap();
        assert!(stamped.last_accessed > long_ago);
        let broken = controller.catalog().update(b.id).await.unwrap().unwrap();
        assert!(!broken.is_ready);
    }

    #[tokio::test]
    async fn crash_rolls_back_until_reset() {
        let dir = TempDir::new().unwrap();
        let controller = open(&dir).await;
        let x = download(&controller, b"bundle x").await;
        let u = update(1_000);
        controller
            .commit_update(u.clone(), vec![NewAsset::new(&x)], &x)
            .await
            .unwrap();

        let first = controller.select_update_for_launch("app", "1.0").await.unwrap();
        assert_eq!(cached_id(&first), Some(u.id));

        controller.report_launch_outcome(u.id, false).await.unwrap();
        let second = controller.select_update_for_launch("app", "1.0").await.unwrap();
        assert!(matches!(
            second,
            LaunchSelection::Embedded {
                reason: FallbackReason::NoCandidates,
                ..
            }
        ));
        assert_eq!(
            controller.catalog().recent_failed_launches(10).await.unwrap(),
            vec![u.id]
        );

        controller.reset_launch_failures(u.id).await.unwrap();
        let third = controller.select_update_for_launch("app", "1.0").await.unwrap();
        assert_eq!(cached_id(&third), Some(u.id));
    }

    #[tokio::test]
    async fn sweep_keeps_the_launched_update() {
        let dir = TempDir::new().unwrap();
        let controller = open(&dir).await;
        let shared = download(&controller, b"shared bundle").await;
        let stale_only = download(&controller, b"stale image").await;

        let stale = update(1_000).accessed_at(Utc::now() - Duration::days(90));
        let current = update(2_000).accessed_at(Utc::now() - Duration::days(90));
        controller
            .commit_update(
                stale.clone(),
                vec![NewAsset::new(&shared), NewAsset::new(&stale_only)],
                &shared,
            )
            .await
            .unwrap();
        controller
            .commit_update(current.clone(), vec![NewAsset::new(&shared)], &shared)
            .await
            .unwrap();

        let selection = controller.select_update_for_launch("app", "1.0").await.unwrap();
        assert_eq!(cached_id(&selection), Some(current.id));

        let report = controller.sweep_protecting(Duration::zero(), None).await.unwrap();
        assert_eq!(report.deleted_updates, vec![stale.id]);
        assert_eq!(report.removed_files, 1);
        assert!(controller.catalog().update(current.id).await.unwrap().is_some());
        assert!(controller.store().root().join(&shared).exists());
        assert!(!controller.store().root().join(&stale_only).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sweep_racing_a_launch_never_deletes_the_selection() {
        for _ in 0..50 {
            let dir = TempDir::new().unwrap();
            let controller = Arc::new(open(&dir).await);
            let x = download(&controller, b"bundle x").await;
            controller
                .commit_update(update(1_000), vec![NewAsset::new(&x)], &x)
                .await
                .unwrap();

            let launching = controller.clone();
            let launch = tokio::spawn(async move {
                launching.select_update_for_launch("app", "1.0").await
            });
            let sweeping = controller.clone();
            let sweep = tokio::spawn(async move {
                sweeping.sweep_protecting(Duration::zero(), None).await
            });

            let selection = launch.await.unwrap().unwrap();
            sweep.await.unwrap().unwrap();

            if let Some(id) = cached_id(&selection) {
                assert!(controller.catalog().update(id).await.unwrap().is_some());
                assert!(selection.launch_asset_path().exists());
                assert_eq!(controller.launched_update(), Some(id));
            }
            controller.close().await;
        }
    }

    #[tokio::test]
    async fn commit_rejects_unknown_launch_asset() {
        let dir = TempDir::new().unwrap();
        let controller = open(&dir).await;
        let x = download(&controller, b"bundle x").await;

        let err = controller
            .commit_update(update(1_000), vec![NewAsset::new(&x)], "not-there")
            .await
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn duplicate_commit_conflicts() {
        let dir = TempDir::new().unwrap();
        let controller = open(&dir).await;
        let x = download(&controller, b"bundle x").await;
        let u = update(1_000);

        controller
            .commit_update(u.clone(), vec![NewAsset::new(&x)], &x)
            .await
            .unwrap();
        let err = controller
            .commit_update(u.clone(), vec![NewAsset::new(&x)], &x)
            .await
            .unwrap_err();
        assert!(matches!(err, BundleCacheError::Conflict(id) if id == u.id));
    }

    #[tokio::test]
    async fn other_runtime_is_never_selected() {
        let dir = TempDir::new().unwrap();
        let controller = open(&dir).await;
        let x = download(&controller, b"bundle x").await;
        let u = NewUpdate::new(Uuid::new_v4(), "app", Utc::now(), "2.0");
        controller
            .commit_update(u, vec![NewAsset::new(&x)], &x)
            .await
            .unwrap();

        let selection = controller.select_update_for_launch("app", "1.0").await.unwrap();
        assert!(selection.is_embedded());
    }

    #[tokio::test]
    async fn missing_embedded_bundle_is_fatal() {
        let dir = TempDir::new().unwrap();
        let controller = UpdatesController::open(&config_for(&dir)).await.unwrap();

        let err = controller
            .select_update_for_launch("app", "1.0")
            .await
            .unwrap_err();
        assert!(matches!(err, BundleCacheError::Fatal(_)));
    }

    #[tokio::test]
    async fn short_circuit_launches_embedded() {
        let dir = TempDir::new().unwrap();
        let controller = open(&dir).await;
        let x = download(&controller, b"bundle x").await;
        controller
            .commit_update(update(1_000), vec![NewAsset::new(&x)], &x)
            .await
            .unwrap();

        controller.short_circuit().trigger();
        let selection = controller.select_update_for_launch("app", "1.0").await.unwrap();
        assert!(matches!(
            selection,
            LaunchSelection::Embedded {
                reason: FallbackReason::ShortCircuit,
                ..
            }
        ));
        assert_eq!(controller.launched_update(), Some(selection.update_id()));
    }
}
