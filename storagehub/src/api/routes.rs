// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The admin HTTP surface and range-streaming route (§6): storage type listing, storage-config
//! CRUD with a connectivity `test` probe, usage reporting, scheduled-job admin, per-mount
//! fs-index control, and the copy engine's ad hoc job endpoints, plus `GET|HEAD /files/*path`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use db::models::{JobRun, Mount, ScheduledJob, StorageConfig};
use db::Db;
use scheduler::handlers::CopyHandler;
use scheduler::{JobState, RetryAction, Scheduler};
use serde::Deserialize;
use serde_json::{json, Value};
use storage::error::StorageError;
use storage::mount::MountResolver;
use storage::range::{serve_range, Channel};
use storage::registry::StorageTypeDescriptor;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::api::stream;
use crate::backend::{decrypt_secret_fields, encrypt_secret_fields, Backend};
use infra::crypto::SecretBox;

/// The metric key the `storage_usage_refresh` handler writes to (kept as a literal here since
/// that handler's own constants are private to its module; both sides of this contract are
/// owned by this crate's wiring).
const USAGE_SCOPE_TYPE: &str = "storage_config";
const USAGE_METRIC_KEY: &str = "computed_usage";

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<Backend>,
    pub db: Arc<Db>,
    pub scheduler: Arc<Scheduler>,
    pub copy_handler: Arc<CopyHandler>,
    pub secret_box: Option<Arc<SecretBox>>,
    /// Whether this host can serve `posix_only` storage types (§6: `LOCAL` is hidden on hosts
    /// that cannot honor an absolute filesystem path, mirroring the teacher's platform guard).
    pub is_posix_host: bool,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/storage-types", get(list_storage_types))
        .route("/api/admin/storage-config", get(list_storage_configs).post(create_storage_config))
        .route("/api/admin/storage-config/:id", put(update_storage_config).delete(delete_storage_config))
        .route("/api/admin/storage-config/:id/test", post(test_storage_config))
        .route("/api/admin/storage/usage", get(storage_usage))
        .route("/api/admin/storage/usage/refresh", post(refresh_usage))
        .route("/api/admin/scheduled/jobs", get(list_scheduled_jobs))
        .route("/api/admin/scheduled/jobs/:task_id/runs", get(list_job_runs))
        .route("/api/admin/scheduled/jobs/:task_id/run-now", post(run_job_now))
        .route("/api/admin/scheduled/jobs/:task_id/cancel", post(cancel_scheduled_job))
        .route("/api/admin/scheduled/ticker", get(ticker_status))
        .route("/api/admin/fs-index/mounts", get(list_fs_index_mounts))
        .route("/api/admin/fs-index/:mount_id/rebuild", post(rebuild_fs_index))
        .route("/api/admin/fs-index/:mount_id/status", get(fs_index_status))
        .route("/api/admin/jobs", post(submit_copy_job))
        .route("/api/admin/jobs/:job_id", get(copy_job_state))
        .route("/api/admin/jobs/:job_id/cancel", post(cancel_copy_job))
        .route("/api/admin/jobs/:job_id/retry", post(retry_copy_job))
        .route("/files/*path", get(serve_file).head(serve_file))
        .with_state(state)
}

// --- Driver Registry & storage-config CRUD (§4.1, §6) ---

async fn list_storage_types(State(state): State<AppState>) -> Json<Vec<StorageTypeDescriptor>> {
    Json(state.backend.registry().list_types(state.is_posix_host))
}

fn redacted(state: &AppState, mut row: StorageConfig) -> StorageConfig {
    row.config_json = state.backend.registry().project_config(&row.storage_type, &row.config_json, false);
    row
}

async fn list_storage_configs(State(state): State<AppState>) -> ApiResult<Json<Vec<StorageConfig>>> {
    let rows = {
        let conn = state.db.lock().await;
        db::repo::storage_configs::list(&conn)?
    };
    Ok(Json(rows.into_iter().map(|row| redacted(&state, row)).collect()))
}

#[derive(Deserialize)]
struct StorageConfigRequest {
    name: String,
    storage_type: String,
    config_json: Value,
    #[serde(default)]
    total_storage_bytes: Option<u64>,
    #[serde(default)]
    enable_disk_usage: bool,
    #[serde(default)]
    is_default: bool,
    #[serde(default)]
    is_public: bool,
}

async fn create_storage_config(State(state): State<AppState>, Json(req): Json<StorageConfigRequest>) -> ApiResult<Json<StorageConfig>> {
    state.backend.registry().validate_config(&req.storage_type, &req.config_json)?;
    let sealed = encrypt_secret_fields(&req.config_json, state.secret_box.as_deref())?;
    let row = StorageConfig {
        id: Uuid::new_v4().to_string(),
        name: req.name,
        storage_type: req.storage_type,
        config_json: sealed,
        total_storage_bytes: req.total_storage_bytes,
        enable_disk_usage: req.enable_disk_usage,
        is_default: req.is_default,
        is_public: req.is_public,
        created_at: db::now_ms(),
        last_used: None,
    };
    {
        let conn = state.db.lock().await;
        db::repo::storage_configs::insert(&conn, &row)?;
    }
    state.backend.reload().await?;
    Ok(Json(redacted(&state, row)))
}

async fn update_storage_config(State(state): State<AppState>, Path(id): Path<String>, Json(req): Json<StorageConfigRequest>) -> ApiResult<Json<StorageConfig>> {
    state.backend.registry().validate_config(&req.storage_type, &req.config_json)?;
    let sealed = encrypt_secret_fields(&req.config_json, state.secret_box.as_deref())?;
    let existing = {
        let conn = state.db.lock().await;
        db::repo::storage_configs::get(&conn, &id)?
    };
    let row = StorageConfig {
        id,
        name: req.name,
        storage_type: req.storage_type,
        config_json: sealed,
        total_storage_bytes: req.total_storage_bytes,
        enable_disk_usage: req.enable_disk_usage,
        is_default: req.is_default,
        is_public: req.is_public,
        created_at: existing.created_at,
        last_used: existing.last_used,
    };
    {
        let conn = state.db.lock().await;
        db::repo::storage_configs::update(&conn, &row)?;
    }
    state.backend.reload().await?;
    Ok(Json(redacted(&state, row)))
}

async fn delete_storage_config(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    {
        let conn = state.db.lock().await;
        db::repo::storage_configs::delete(&conn, &id)?;
    }
    state.backend.reload().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct TestReport {
    version: String,
    storage_type: String,
    info: Value,
    checks: Vec<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<Value>,
    timing: Timing,
}

#[derive(serde::Serialize)]
struct CheckResult {
    name: String,
    passed: bool,
    message: Option<String>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Timing {
    duration_ms: u128,
}

/// `POST .../{id}/test` (§4.1/§6): there is no `testConnection` method on `Driver`, so this
/// probes connectivity with the methods every capability set is expected to have: a fresh
/// `create_driver` call (which already runs the full contract check) followed by a
/// best-effort `list_directory("/")`.
async fn test_storage_config(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<TestReport>> {
    let started = Instant::now();
    let config = {
        let conn = state.db.lock().await;
        db::repo::storage_configs::get(&conn, &id)?
    };
    let plaintext = decrypt_secret_fields(&config.config_json, state.secret_box.as_deref())?;

    let mut checks = Vec::new();
    let driver_result = state.backend.registry().create_driver(&config.storage_type, &plaintext).await;
    let (info, diagnostics) = match &driver_result {
        Ok(driver) => (json!({"type": driver.get_type(), "capabilities": driver.get_capabilities()}), None),
        Err(err) => (json!({"constructed": false}), Some(json!({"message": err.to_string()}))),
    };

    if let Ok(driver) = &driver_result {
        let listing = driver.list_directory("/").await;
        checks.push(CheckResult {
            name: "list_directory".to_owned(),
            passed: listing.is_ok(),
            message: listing.err().map(|err| err.to_string()),
        });
    } else {
        checks.push(CheckResult {
            name: "create_driver".to_owned(),
            passed: false,
            message: driver_result.as_ref().err().map(|err| err.to_string()),
        });
    }

    Ok(Json(TestReport {
        version: env!("CARGO_PKG_VERSION").to_owned(),
        storage_type: config.storage_type,
        info,
        checks,
        diagnostics,
        timing: Timing {
            duration_ms: started.elapsed().as_millis(),
        },
    }))
}

// --- Quota & Usage (§4.3, §6) ---

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ComputedUsage {
    used_bytes: Option<u64>,
    source: Option<String>,
    snapshot_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct LimitStatus {
    limit_bytes: Option<u64>,
    percent_used: Option<f64>,
    exceeded: bool,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct UsageEntry {
    id: String,
    name: String,
    storage_type: String,
    configured_limit_bytes: Option<u64>,
    computed_usage: ComputedUsage,
    limit_status: LimitStatus,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct UsageReport {
    storages: Vec<UsageEntry>,
    generated_at: i64,
}

fn usage_source_label(source: &str) -> &'static str {
    match source {
        s if s.contains("ProviderQuota") => "provider_quota",
        s if s.contains("LocalDu") => "local_du",
        s if s.contains("VfsInventory") => "vfs_inventory",
        s if s.contains("SearchIndex") => "search_index",
        _ => "unknown",
    }
}

async fn storage_usage(State(state): State<AppState>) -> ApiResult<Json<UsageReport>> {
    let (configs, snapshots) = {
        let conn = state.db.lock().await;
        let configs = db::repo::storage_configs::list(&conn)?;
        let mut snapshots = std::collections::HashMap::new();
        for config in &configs {
            if let Some(snapshot) = db::repo::metrics::get(&conn, USAGE_SCOPE_TYPE, &config.id, USAGE_METRIC_KEY)? {
                snapshots.insert(config.id.clone(), snapshot);
            }
        }
        (configs, snapshots)
    };

    let storages = configs
        .into_iter()
        .map(|config| {
            let snapshot = snapshots.get(&config.id);
            let used_bytes = snapshot.and_then(|s| s.value_num).map(|v| v as u64);
            let limit_bytes = config.total_storage_bytes;
            let percent_used = match (used_bytes, limit_bytes) {
                (Some(used), Some(limit)) if limit > 0 => Some(used as f64 / limit as f64 * 100.0),
                _ => None,
            };
            let exceeded = match (used_bytes, limit_bytes) {
                (Some(used), Some(limit)) => used > limit,
                _ => false,
            };
            UsageEntry {
                id: config.id,
                name: config.name,
                storage_type: config.storage_type,
                configured_limit_bytes: limit_bytes,
                computed_usage: ComputedUsage {
                    used_bytes,
                    source: snapshot.and_then(|s| s.value_text.clone()).as_deref().map(usage_source_label).map(str::to_owned),
                    snapshot_at: snapshot.map(|s| s.snapshot_at_ms),
                    details: snapshot.and_then(|s| s.value_json_text.as_deref()).and_then(|raw| serde_json::from_str(raw).ok()),
                },
                limit_status: LimitStatus {
                    limit_bytes,
                    percent_used,
                    exceeded,
                },
            }
        })
        .collect();

    Ok(Json(UsageReport {
        storages,
        generated_at: db::now_ms(),
    }))
}

async fn refresh_usage(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.scheduler.run_now("storage_usage_refresh").await?;
    Ok(StatusCode::ACCEPTED)
}

// --- Scheduler admin (§4.4, §6) ---

async fn list_scheduled_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<ScheduledJob>>> {
    let conn = state.db.lock().await;
    Ok(Json(db::repo::scheduled_jobs::list(&conn)?))
}

async fn list_job_runs(State(state): State<AppState>, Path(task_id): Path<String>) -> ApiResult<Json<Vec<JobRun>>> {
    let conn = state.db.lock().await;
    Ok(Json(db::repo::job_runs::list_for_task(&conn, &task_id, 200)?))
}

async fn run_job_now(State(state): State<AppState>, Path(task_id): Path<String>) -> ApiResult<StatusCode> {
    state.scheduler.run_now(&task_id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn cancel_scheduled_job(State(state): State<AppState>, Path(task_id): Path<String>) -> Json<Value> {
    let cancelled = state.scheduler.cancel(&task_id).await;
    Json(json!({"cancelled": cancelled}))
}

async fn ticker_status(State(state): State<AppState>) -> Json<Value> {
    let ticker = state.scheduler.ticker();
    let last_tick = ticker.last_tick().map(|tick| json!({"atMs": tick.at_ms, "outcomeCount": tick.outcome_count}));
    Json(json!({"lastTick": last_tick, "nextTickAtMs": ticker.next_tick_at_ms()}))
}

// --- fs-index admin (§4.6, §6) ---

fn fs_index_task_id(mount_id: &str) -> String {
    format!("fs_index_rebuild:{mount_id}")
}

async fn list_fs_index_mounts(State(state): State<AppState>) -> ApiResult<Json<Vec<Value>>> {
    let conn = state.db.lock().await;
    let mounts: Vec<Mount> = db::repo::mounts::list(&conn)?;
    let mut out = Vec::with_capacity(mounts.len());
    for mount in mounts {
        let depth = db::repo::dirty_queue::depth(&conn, &mount.id)?;
        let job = db::repo::scheduled_jobs::get(&conn, &fs_index_task_id(&mount.id)).ok();
        out.push(json!({"mount": mount, "dirtyQueueDepth": depth, "job": job}));
    }
    Ok(Json(out))
}

async fn rebuild_fs_index(State(state): State<AppState>, Path(mount_id): Path<String>) -> ApiResult<StatusCode> {
    let task_id = fs_index_task_id(&mount_id);
    {
        let conn = state.db.lock().await;
        db::repo::mounts::get(&conn, &mount_id)?;
        if db::repo::scheduled_jobs::get(&conn, &task_id).is_err() {
            db::repo::scheduled_jobs::upsert(
                &conn,
                &ScheduledJob {
                    task_id: task_id.clone(),
                    handler_name: "fs_index_rebuild".to_owned(),
                    cron_expr: None,
                    interval_seconds: Some(3600),
                    enabled: true,
                    last_run_started_at: None,
                    last_run_finished_at: None,
                    next_run_after: db::now_ms(),
                    lock_until: None,
                    run_count: 0,
                    payload_json: json!({"mount_id": mount_id}),
                    meta_json: json!({}),
                },
            )?;
        }
    }
    state.scheduler.run_now(&task_id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn fs_index_status(State(state): State<AppState>, Path(mount_id): Path<String>) -> ApiResult<Json<Value>> {
    let conn = state.db.lock().await;
    db::repo::mounts::get(&conn, &mount_id)?;
    let depth = db::repo::dirty_queue::depth(&conn, &mount_id)?;
    let recent_runs = db::repo::job_runs::list_for_task(&conn, &fs_index_task_id(&mount_id), 5)?;
    Ok(Json(json!({"dirtyQueueDepth": depth, "recentRuns": recent_runs})))
}

// --- Copy engine ad hoc jobs (§4.7, §6) ---

fn default_user_id() -> String {
    "system".to_owned()
}

#[derive(Deserialize)]
struct SubmitCopyJobRequest {
    #[serde(default)]
    job_id: Option<String>,
    items: Vec<Value>,
    #[serde(default = "default_user_id")]
    user_id: String,
    #[serde(default)]
    allow_parallel: bool,
}

async fn submit_copy_job(State(state): State<AppState>, Json(req): Json<SubmitCopyJobRequest>) -> ApiResult<Json<JobState>> {
    let job_id = req.job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let payload = json!({"items": req.items, "user_id": req.user_id, "allow_parallel": req.allow_parallel});
    let job_state = state.copy_handler.submit_adhoc(&job_id, payload).await?;
    Ok(Json(job_state))
}

async fn copy_job_state(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<JobState>> {
    match state.copy_handler.state(&job_id).await {
        Some(job_state) => Ok(Json(job_state)),
        None => Err(StorageError::not_found(format!("no such job `{job_id}`")).into()),
    }
}

async fn cancel_copy_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Json<Value> {
    let cancelled = state.copy_handler.cancel(&job_id).await;
    Json(json!({"cancelled": cancelled}))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetryRequest {
    #[serde(default)]
    retry_item: Option<String>,
}

async fn retry_copy_job(State(state): State<AppState>, Path(job_id): Path<String>, Json(req): Json<RetryRequest>) -> ApiResult<Json<JobState>> {
    let action = match req.retry_item {
        Some(item_id) => RetryAction::RetryItem(item_id),
        None => RetryAction::RetryAllFailed,
    };
    let job_state = state.copy_handler.retry(&job_id, action).await.map_err(StorageError::from)?;
    Ok(Json(job_state))
}

// --- Range streaming (§4.2, §6) ---

async fn serve_file(State(state): State<AppState>, method: Method, Path(path): Path<String>, headers: HeaderMap) -> Response {
    let logical_path = format!("/{path}");
    match serve_file_inner(&state, &method, &logical_path, &headers).await {
        Ok(response) => response,
        Err(err) => ApiError::from(err).into_response(),
    }
}

async fn serve_file_inner(state: &AppState, method: &Method, logical_path: &str, headers: &HeaderMap) -> Result<Response, StorageError> {
    let resolved = MountResolver::resolve(state.backend.as_ref(), logical_path)?;
    let descriptor = resolved.driver.download_file(&resolved.sub_path).await?;
    let ctx = stream::request_context(headers, method, logical_path, descriptor.as_ref(), Channel::FsWeb);
    let cancel = CancellationToken::new();
    let range_response = serve_range(&ctx, descriptor.as_ref(), cancel).await?;
    Ok(stream::into_response(range_response, *method == Method::HEAD))
}
