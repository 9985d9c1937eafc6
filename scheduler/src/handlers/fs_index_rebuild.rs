// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `fs_index_rebuild` handler (§4.6): clears and repopulates `fs_search_index_entries` for one
//! mount from a live directory listing. Guarded per-mount so a second rebuild request for a
//! mount already in flight is refused with `BUSY` rather than racing the first (§5 concurrency).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use db::models::{IndexEntryStatus, SearchIndexEntry};
use db::Db;
use serde_json::{json, Value};
use storage::error::StorageError;
use tokio::sync::Mutex;

use crate::error::SchedulerError;
use crate::handler::{Handler, HandlerContext};

pub struct FsEntry {
    pub path: String,
    pub is_dir: bool,
    pub size: Option<u64>,
}

/// What `storagehub` knows about walking a mount's backing filesystem that this crate does not:
/// the concrete driver and its root. Mirrors `storage::quota::UsageProbes`'s narrow-trait shape.
#[async_trait]
pub trait FsBackend: Send + Sync {
    async fn list_recursive(&self, mount_id: &str) -> Result<Vec<FsEntry>, StorageError>;
}

pub struct FsIndexRebuildHandler {
    db: Arc<Db>,
    backend: Arc<dyn FsBackend>,
    in_flight: Mutex<HashSet<String>>,
}

impl FsIndexRebuildHandler {
    pub fn new(db: Arc<Db>, backend: Arc<dyn FsBackend>) -> Self {
        FsIndexRebuildHandler {
            db,
            backend,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    async fn rebuild(&self, mount_id: &str) -> Result<u64, SchedulerError> {
        let entries = self.backend.list_recursive(mount_id).await?;
        let conn = self.db.lock().await;
        db::repo::search_index::clear_mount(&conn, mount_id)?;
        for entry in &entries {
            db::repo::search_index::upsert(
                &conn,
                &SearchIndexEntry {
                    mount_id: mount_id.to_owned(),
                    path: entry.path.clone(),
                    is_dir: entry.is_dir,
                    size: entry.size,
                    status: IndexEntryStatus::Ready,
                },
            )?;
        }
        Ok(entries.len() as u64)
    }
}

#[async_trait]
impl Handler for FsIndexRebuildHandler {
    fn name(&self) -> &'static str {
        "fs_index_rebuild"
    }

    async fn run(&self, ctx: HandlerContext) -> Result<Value, SchedulerError> {
        let mount_id = ctx
            .payload
            .get("mount_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SchedulerError::Storage(StorageError::validation("fs_index_rebuild payload is missing `mount_id`")))?
            .to_owned();

        {
            let mut guard = self.in_flight.lock().await;
            if guard.contains(&mount_id) {
                return Err(SchedulerError::Storage(StorageError::busy(format!(
                    "a rebuild is already in flight for mount `{mount_id}`"
                ))));
            }
            guard.insert(mount_id.clone());
        }

        let result = self.rebuild(&mount_id).await;
        self.in_flight.lock().await.remove(&mount_id);

        let indexed = result?;
        Ok(json!({"mount_id": mount_id, "indexed": indexed}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedListing(Vec<FsEntry>);

    #[async_trait]
    impl FsBackend for FixedListing {
        async fn list_recursive(&self, _mount_id: &str) -> Result<Vec<FsEntry>, StorageError> {
            Ok(self
                .0
                .iter()
                .map(|e| FsEntry {
                    path: e.path.clone(),
                    is_dir: e.is_dir,
                    size: e.size,
                })
                .collect())
        }
    }

    fn open_db() -> Arc<Db> {
        Arc::new(Db::open_in_memory().unwrap())
    }

    fn ctx(payload: Value) -> HandlerContext {
        HandlerContext {
            task_id: "t1".to_owned(),
            run_id: "r1".to_owned(),
            payload,
            cancel: tokio_util::sync::CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn rebuild_clears_stale_entries_before_repopulating() {
        let db = open_db();
        db.migrate().await.unwrap();
        {
            let conn = db.lock().await;
            db::repo::search_index::upsert(
                &conn,
                &SearchIndexEntry {
                    mount_id: "m1".to_owned(),
                    path: "/stale".to_owned(),
                    is_dir: false,
                    size: Some(1),
                    status: IndexEntryStatus::Ready,
                },
            )
            .unwrap();
        }
        let backend = FixedListing(vec![FsEntry {
            path: "/a".to_owned(),
            is_dir: false,
            size: Some(10),
        }]);
        let handler = FsIndexRebuildHandler::new(db.clone(), Arc::new(backend));
        handler.run(ctx(json!({"mount_id": "m1"}))).await.unwrap();

        let conn = db.lock().await;
        let entries = db::repo::search_index::list_for_mount(&conn, "m1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/a");
    }

    #[tokio::test]
    async fn missing_mount_id_is_rejected() {
        let db = open_db();
        db.migrate().await.unwrap();
        let handler = FsIndexRebuildHandler::new(db, Arc::new(FixedListing(vec![])));
        let err = handler.run(ctx(json!({}))).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Storage(StorageError::Validation(_))));
    }
}
