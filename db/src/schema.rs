// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Fixed DDL for every table named in §3/§6. There is no per-column migration history beyond
//! the single `schema_migrations` chain described in §4.5: this workspace targets exactly one
//! schema (`CURRENT_SCHEMA_VERSION`), so "migrating" an unknown database means either creating
//! this DDL fresh or squash-marking it as already applied (see `migrations.rs`).

/// The final schema version this binary knows how to run against. Schema-adopt (§4.5)
/// squash-marks `v01..vCURRENT`.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Table names schema-adopt checks for to decide "has required tables?" (§4.5 decision matrix).
pub const REQUIRED_TABLES: &[&str] = &[
    "storage_configs",
    "mounts",
    "metrics_cache",
    "schema_migrations",
    "scheduled_jobs",
    "scheduled_job_runs",
    "vfs_nodes",
    "fs_search_index_entries",
    "fs_dirty_queue",
];

/// Tables whose presence of rows means "has business rows?" in the §4.5 decision matrix. Schema
/// metadata tables (`schema_migrations`, `system_settings`) don't count.
pub const BUSINESS_TABLES: &[&str] = &["storage_configs", "mounts"];

pub const ALL_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS storage_configs (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        storage_type TEXT NOT NULL,
        config_json TEXT NOT NULL,
        total_storage_bytes INTEGER,
        enable_disk_usage INTEGER NOT NULL DEFAULT 0,
        is_default INTEGER NOT NULL DEFAULT 0,
        is_public INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        last_used INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mounts (
        id TEXT PRIMARY KEY,
        storage_config_id TEXT NOT NULL REFERENCES storage_configs(id),
        mount_path TEXT NOT NULL UNIQUE,
        default_subfolder TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_mounts_storage_config ON mounts(storage_config_id)",
    r#"
    CREATE TABLE IF NOT EXISTS metrics_cache (
        scope_type TEXT NOT NULL,
        scope_id TEXT NOT NULL,
        metric_key TEXT NOT NULL,
        value_num REAL,
        value_text TEXT,
        value_json_text TEXT,
        snapshot_at_ms INTEGER NOT NULL,
        updated_at_ms INTEGER NOT NULL,
        error_message TEXT,
        PRIMARY KEY (scope_type, scope_id, metric_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scheduled_jobs (
        task_id TEXT PRIMARY KEY,
        handler_name TEXT NOT NULL,
        cron_expr TEXT,
        interval_seconds INTEGER,
        enabled INTEGER NOT NULL DEFAULT 1,
        last_run_started_at INTEGER,
        last_run_finished_at INTEGER,
        next_run_after INTEGER NOT NULL,
        lock_until INTEGER,
        run_count INTEGER NOT NULL DEFAULT 0,
        payload_json TEXT NOT NULL DEFAULT '{}',
        meta_json TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_scheduled_jobs_due ON scheduled_jobs(enabled, next_run_after)",
    r#"
    CREATE TABLE IF NOT EXISTS scheduled_job_runs (
        task_id TEXT NOT NULL,
        run_id TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        finished_at INTEGER,
        status TEXT NOT NULL,
        stats_json TEXT,
        error TEXT,
        PRIMARY KEY (task_id, run_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_job_runs_task_started ON scheduled_job_runs(task_id, started_at)",
    r#"
    CREATE TABLE IF NOT EXISTS vfs_nodes (
        scope_type TEXT NOT NULL,
        scope_id TEXT NOT NULL,
        node_type TEXT NOT NULL,
        path TEXT NOT NULL,
        size INTEGER,
        status TEXT NOT NULL DEFAULT 'active',
        PRIMARY KEY (scope_type, scope_id, path)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_vfs_nodes_scope ON vfs_nodes(scope_type, scope_id, status)",
    r#"
    CREATE TABLE IF NOT EXISTS fs_search_index_entries (
        mount_id TEXT NOT NULL,
        path TEXT NOT NULL,
        is_dir INTEGER NOT NULL DEFAULT 0,
        size INTEGER,
        status TEXT NOT NULL DEFAULT 'ready',
        PRIMARY KEY (mount_id, path)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_search_index_mount_status ON fs_search_index_entries(mount_id, status)",
    r#"
    CREATE TABLE IF NOT EXISTS fs_dirty_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        mount_id TEXT NOT NULL,
        path TEXT NOT NULL,
        op TEXT NOT NULL,
        enqueued_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dirty_queue_mount_order ON fs_dirty_queue(mount_id, id)",
    r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        id TEXT PRIMARY KEY,
        applied_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS system_settings (
        key TEXT PRIMARY KEY,
        value TEXT
    )
    "#,
];
