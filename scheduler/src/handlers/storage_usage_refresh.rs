// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `storage_usage_refresh` handler (§4.3/§4.4, testable property 5): recomputes and persists a
//! [`storage::quota::UsageSnapshot`] for every `StorageConfig` that opted into usage tracking. A
//! failed probe never clobbers the last known-good `value_num`/`value_text` -- a stale number is
//! more useful to an admin than a blank one.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use db::models::MetricsSnapshot;
use db::Db;
use serde_json::{json, Value};
use storage::contract::ProviderStats;
use storage::quota::{QuotaEngine, UsageProbes};
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use crate::handler::{Handler, HandlerContext};

const SCOPE_TYPE: &str = "storage_config";
const METRIC_KEY: &str = "computed_usage";

/// What `storagehub` knows about a live backend that the quota engine cannot derive from the
/// `db` rows alone: a `LOCAL` mount's filesystem root, and a driver's provider-reported stats.
#[async_trait]
pub trait StorageBackendFacade: Send + Sync {
    fn local_root(&self, storage_config_id: &str) -> Option<PathBuf>;
    async fn provider_stats(&self, storage_config_id: &str, cancel: CancellationToken) -> Option<ProviderStats>;
}

/// Sums the `vfs_nodes`/`fs_search_index_entries` fallback tiers across every mount bound to one
/// `StorageConfig`; those tables are keyed per-mount, but usage is reported per-config (§4.3).
struct DbUsageProbes {
    db: Arc<Db>,
}

#[async_trait]
impl UsageProbes for DbUsageProbes {
    async fn vfs_inventory_bytes(&self, storage_config_id: &str) -> Option<u64> {
        let conn = self.db.lock().await;
        let mounts = db::repo::mounts::list_for_storage_config(&conn, storage_config_id).ok()?;
        let mut total = 0u64;
        let mut any = false;
        for mount in mounts {
            if let Ok(Some(bytes)) = db::repo::vfs_nodes::total_active_bytes(&conn, "mount", &mount.id) {
                total += bytes;
                any = true;
            }
        }
        any.then_some(total)
    }

    async fn search_index_bytes(&self, storage_config_id: &str) -> Option<u64> {
        let conn = self.db.lock().await;
        let mounts = db::repo::mounts::list_for_storage_config(&conn, storage_config_id).ok()?;
        let mut total = 0u64;
        let mut any = false;
        for mount in mounts {
            if let Ok(Some(bytes)) = db::repo::search_index::total_bytes(&conn, &mount.id) {
                total += bytes;
                any = true;
            }
        }
        any.then_some(total)
    }
}

pub struct StorageUsageRefreshHandler {
    db: Arc<Db>,
    quota: QuotaEngine,
    backend: Arc<dyn StorageBackendFacade>,
}

impl StorageUsageRefreshHandler {
    pub fn new(db: Arc<Db>, backend: Arc<dyn StorageBackendFacade>) -> Self {
        StorageUsageRefreshHandler {
            db,
            quota: QuotaEngine::new(),
            backend,
        }
    }
}

#[async_trait]
impl Handler for StorageUsageRefreshHandler {
    fn name(&self) -> &'static str {
        "storage_usage_refresh"
    }

    async fn run(&self, ctx: HandlerContext) -> Result<Value, SchedulerError> {
        let configs = {
            let conn = self.db.lock().await;
            db::repo::storage_configs::list(&conn)?
        };
        let probes = DbUsageProbes { db: self.db.clone() };

        let mut refreshed = 0u64;
        let mut probe_failures = 0u64;
        for config in &configs {
            if ctx.cancel.is_cancelled() {
                break;
            }
            if !config.enable_disk_usage {
                continue;
            }

            let local_root = self.backend.local_root(&config.id);
            let backend = self.backend.clone();
            let config_id = config.id.clone();
            let cancel = ctx.cancel.clone();
            let stats_probe = move || -> Pin<Box<dyn Future<Output = Option<ProviderStats>> + Send>> {
                let backend = backend.clone();
                let config_id = config_id.clone();
                let cancel = cancel.clone();
                Box::pin(async move { backend.provider_stats(&config_id, cancel).await })
            };

            let snapshot = self
                .quota
                .compute_usage(&config.id, &config.storage_type, local_root.as_deref(), Some(&stats_probe), &probes, false)
                .await;

            let now = db::now_ms();
            let conn = self.db.lock().await;
            let existing = db::repo::metrics::get(&conn, SCOPE_TYPE, &config.id, METRIC_KEY)?;
            let (value_num, value_text, error_message) = match snapshot.used_bytes {
                Some(used) => {
                    refreshed += 1;
                    (Some(used as f64), Some(format!("{:?}", snapshot.source)), None)
                }
                None => {
                    probe_failures += 1;
                    let preserved_num = existing.as_ref().and_then(|s| s.value_num);
                    let preserved_text = existing.as_ref().and_then(|s| s.value_text.clone());
                    (preserved_num, preserved_text, Some("usage probe returned no data".to_owned()))
                }
            };
            db::repo::metrics::upsert(
                &conn,
                &MetricsSnapshot {
                    scope_type: SCOPE_TYPE.to_owned(),
                    scope_id: config.id.clone(),
                    metric_key: METRIC_KEY.to_owned(),
                    value_num,
                    value_text,
                    value_json_text: Some(json!({"total_bytes": snapshot.total_bytes, "stale": snapshot.stale}).to_string()),
                    snapshot_at_ms: now,
                    updated_at_ms: now,
                    error_message,
                },
            )?;
        }

        Ok(json!({"configs_seen": configs.len(), "refreshed": refreshed, "probe_failures": probe_failures}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json as json_macro;

    struct NoLocalRoot;

    #[async_trait]
    impl StorageBackendFacade for NoLocalRoot {
        fn local_root(&self, _storage_config_id: &str) -> Option<PathBuf> {
            None
        }
        async fn provider_stats(&self, _storage_config_id: &str, _cancel: CancellationToken) -> Option<ProviderStats> {
            None
        }
    }

    fn open_db() -> Arc<Db> {
        Arc::new(Db::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn failed_probe_preserves_previous_value_instead_of_clobbering_it() {
        let db = open_db();
        db.migrate().await.unwrap();
        {
            let conn = db.lock().await;
            db::repo::storage_configs::insert(
                &conn,
                &db::models::StorageConfig {
                    id: "sc1".to_owned(),
                    name: "primary".to_owned(),
                    storage_type: "MEMORY".to_owned(),
                    config_json: json_macro!({}),
                    total_storage_bytes: None,
                    enable_disk_usage: true,
                    is_default: true,
                    is_public: false,
                    created_at: 0,
                    last_used: None,
                },
            )
            .unwrap();
            db::repo::metrics::upsert(
                &conn,
                &MetricsSnapshot {
                    scope_type: SCOPE_TYPE.to_owned(),
                    scope_id: "sc1".to_owned(),
                    metric_key: METRIC_KEY.to_owned(),
                    value_num: Some(4096.0),
                    value_text: Some("PROVIDER_QUOTA".to_owned()),
                    value_json_text: None,
                    snapshot_at_ms: 0,
                    updated_at_ms: 0,
                    error_message: None,
                },
            )
            .unwrap();
        }

        let handler = StorageUsageRefreshHandler::new(db.clone(), Arc::new(NoLocalRoot));
        let ctx = HandlerContext {
            task_id: "t1".to_owned(),
            run_id: "r1".to_owned(),
            payload: Value::Null,
            cancel: CancellationToken::new(),
        };
        handler.run(ctx).await.unwrap();

        let conn = db.lock().await;
        let snapshot = db::repo::metrics::get(&conn, SCOPE_TYPE, "sc1", METRIC_KEY).unwrap().unwrap();
        assert_eq!(snapshot.value_num, Some(4096.0));
        assert!(snapshot.error_message.is_some());
    }
}
