// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Row types for every persisted table named in §3/§6: storage configs, mounts, metrics
//! snapshots, scheduled jobs and their runs, the dirty-reindex queue, and the VFS inventory.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of one backend mount (§3 `StorageConfig`). `config_json` carries backend-specific,
/// opaque configuration; secret-bearing fields inside it are sealed at rest by
/// `infra::crypto::SecretBox` before this row is written, and opened again only when a caller
/// requests `with_secrets` (§4.1 `configProjector`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub id: String,
    pub name: String,
    pub storage_type: String,
    pub config_json: Value,
    /// User-imposed cap in bytes; `None` means unlimited (§4.3 admission guard).
    pub total_storage_bytes: Option<u64>,
    /// Whether the quota engine should probe upstream usage for this config (§4.3).
    pub enable_disk_usage: bool,
    pub is_default: bool,
    pub is_public: bool,
    pub created_at: i64,
    pub last_used: Option<i64>,
}

/// A path-prefix binding of a `StorageConfig` into the logical VFS (§3 `Mount`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mount {
    pub id: String,
    pub storage_config_id: String,
    pub mount_path: String,
    pub default_subfolder: Option<String>,
}

/// One row of `metrics_cache` (§3 `MetricsSnapshot`, §6 persisted state): a single cached
/// computation for one `(scope_type, scope_id, metric_key)` triple. The quota engine only ever
/// writes `metric_key = "computed_usage"`, `scope_type = "storage_config"`, but the table itself
/// is generic the way the teacher's own metrics/gauge plumbing is keyed by a free-form name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub scope_type: String,
    pub scope_id: String,
    pub metric_key: String,
    pub value_num: Option<f64>,
    pub value_text: Option<String>,
    pub value_json_text: Option<String>,
    pub snapshot_at_ms: i64,
    pub updated_at_ms: i64,
    pub error_message: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    Running,
    Success,
    Failed,
    Cancelled,
}

impl JobRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Success => "success",
            JobRunStatus::Failed => "failed",
            JobRunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobRunStatus::Running),
            "success" => Some(JobRunStatus::Success),
            "failed" => Some(JobRunStatus::Failed),
            "cancelled" => Some(JobRunStatus::Cancelled),
            _ => None,
        }
    }
}

/// §3 `ScheduledJob`. Exactly one of `cron_expr`/`interval_seconds` is set (§4.4 Firing): a job
/// uses cron wildcard syntax or a fixed interval, never both.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub task_id: String,
    pub handler_name: String,
    pub cron_expr: Option<String>,
    pub interval_seconds: Option<i64>,
    pub enabled: bool,
    pub last_run_started_at: Option<i64>,
    pub last_run_finished_at: Option<i64>,
    pub next_run_after: i64,
    pub lock_until: Option<i64>,
    pub run_count: i64,
    pub payload_json: Value,
    pub meta_json: Value,
}

/// §3 `JobRun`: one row per handler invocation, kept in a per-task bounded ring (§4.4 History).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRun {
    pub task_id: String,
    pub run_id: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: JobRunStatus,
    pub stats_json: Option<Value>,
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyOp {
    Upsert,
    Delete,
}

impl DirtyOp {
    pub fn as_str(self) -> &'static str {
        match self {
            DirtyOp::Upsert => "upsert",
            DirtyOp::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upsert" => Some(DirtyOp::Upsert),
            "delete" => Some(DirtyOp::Delete),
            _ => None,
        }
    }
}

/// §3 `DirtyQueue`: filesystem-change events awaiting search-index reconciliation for one
/// mount, processed FIFO (§5 Ordering).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirtyQueueEntry {
    pub id: i64,
    pub mount_id: String,
    pub path: String,
    pub op: DirtyOp,
    pub enqueued_at: i64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VfsNodeType {
    File,
    Dir,
}

impl VfsNodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            VfsNodeType::File => "file",
            VfsNodeType::Dir => "dir",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(VfsNodeType::File),
            "dir" => Some(VfsNodeType::Dir),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VfsNodeStatus {
    Active,
    Deleted,
}

impl VfsNodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VfsNodeStatus::Active => "active",
            VfsNodeStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(VfsNodeStatus::Active),
            "deleted" => Some(VfsNodeStatus::Deleted),
            _ => None,
        }
    }
}

/// §3 `VfsNode`: the logical inventory the engine keeps for internal bookkeeping; feeds the
/// `vfs-inventory` quota tier (§4.3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VfsNode {
    pub scope_type: String,
    pub scope_id: String,
    pub node_type: VfsNodeType,
    pub path: String,
    pub size: Option<u64>,
    pub status: VfsNodeStatus,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexEntryStatus {
    Ready,
    Pending,
}

impl IndexEntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexEntryStatus::Ready => "ready",
            IndexEntryStatus::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(IndexEntryStatus::Ready),
            "pending" => Some(IndexEntryStatus::Pending),
            _ => None,
        }
    }
}

/// One row of `fs_search_index_entries` (§3, §6): feeds the `search-index` quota tier, the
/// lowest-priority (and least authoritative) of the four (§4.3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchIndexEntry {
    pub mount_id: String,
    pub path: String,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub status: IndexEntryStatus,
}

/// §3 `SchemaMigration`: single-table schema version chain, adopt-once semantics per §4.5.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchemaMigrationRecord {
    pub id: String,
    pub applied_at: i64,
}
