//! Catalog table definitions
//!
//! Timestamps are unix milliseconds. Update ids are hyphenated UUID text.

/// Bumped whenever a statement below changes shape
pub const SCHEMA_VERSION: i64 = 1;

pub const CREATE_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS updates (
        id TEXT PRIMARY KEY NOT NULL,
        scope_key TEXT NOT NULL,
        commit_time INTEGER NOT NULL,
        runtime_version TEXT NOT NULL,
        is_ready INTEGER NOT NULL DEFAULT 1,
        successful_launch_count INTEGER NOT NULL DEFAULT 0,
        failed_launch_count INTEGER NOT NULL DEFAULT 0,
        last_accessed INTEGER NOT NULL,
        manifest TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_updates_candidates
        ON updates (scope_key, runtime_version, commit_time)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS assets (
        key TEXT PRIMARY KEY NOT NULL,
        relative_path TEXT NOT NULL,
        expected_hash TEXT,
        content_type TEXT,
        embedded_filename TEXT,
        download_time INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_assets_relative_path
        ON assets (relative_path)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS update_assets (
        update_id TEXT NOT NULL REFERENCES updates (id) ON DELETE CASCADE,
        asset_key TEXT NOT NULL REFERENCES assets (key),
        is_launch_asset INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (update_id, asset_key)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_update_assets_asset_key
        ON update_assets (asset_key)
    "#,
    // At most one launch asset per update; insert validation enforces at least one.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_update_assets_one_launch
        ON update_assets (update_id) WHERE is_launch_asset = 1
    "#,
];
