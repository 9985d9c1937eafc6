// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `copy` handler (§4.7): copies a batch of logical paths, preferring a driver-native
//! `copy_item()` when both ends resolve to the same backend instance and otherwise falling back
//! to download-then-upload. `Driver::upload_file` takes a full `Bytes` buffer rather than an
//! incremental stream, so the fallback path buffers an entire source object in memory before the
//! upload begins -- a real limitation of the current driver contract, not an oversight here. Once
//! uploaded, the target is re-read and its `etag()` compared against the source's content digest
//! when the target driver reports one, catching silent corruption across the buffer hop; drivers
//! that don't emit a digest-based etag (the stub backends) are simply not verified.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use serde_json::Value;
use storage::contract::{CopyResult, Driver};
use storage::error::StorageError;
use storage::Digest;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use crate::handler::{Handler, HandlerContext};
use crate::task_engine::{ItemOutcome, ItemWorker, JobState, JobSubmission, RetryAction, TaskEngine, TriggerType};

/// A logical path resolved to the concrete driver that owns it, plus the path within that
/// driver's own namespace (§4.1: drivers never see the mount prefix).
pub struct ResolvedPath {
    pub driver: Arc<dyn Driver>,
    pub storage_type: String,
    pub storage_config_id: String,
    pub sub_path: String,
}

/// What `storagehub` knows about the mount table that this crate does not: how a logical path
/// maps onto a concrete, already-constructed driver instance.
#[async_trait]
pub trait PathResolver: Send + Sync {
    async fn resolve(&self, logical_path: &str) -> Result<ResolvedPath, StorageError>;

    /// §4.3 admission guard: consulted before the cross-backend fallback path uploads
    /// `incoming_bytes` to `storage_config_id`. The default is a no-op so resolvers that don't
    /// care about quota (tests, mounts with no configured limit) don't have to implement it.
    async fn check_admission(&self, _storage_config_id: &str, _incoming_bytes: u64) -> Result<(), StorageError> {
        Ok(())
    }
}

struct CopyItemWorker {
    resolver: Arc<dyn PathResolver>,
    pairs: HashMap<String, (String, String)>,
}

#[async_trait]
impl ItemWorker for CopyItemWorker {
    async fn process(&self, item_id: &str, cancel: CancellationToken) -> ItemOutcome {
        let Some((source, target)) = self.pairs.get(item_id) else {
            return ItemOutcome::Failed { message: "unknown copy item".to_owned() };
        };
        if cancel.is_cancelled() {
            return ItemOutcome::Failed { message: "cancelled".to_owned() };
        }

        let src = match self.resolver.resolve(source).await {
            Ok(r) => r,
            Err(err) => return ItemOutcome::Failed { message: err.to_string() },
        };
        let dst = match self.resolver.resolve(target).await {
            Ok(r) => r,
            Err(err) => return ItemOutcome::Failed { message: err.to_string() },
        };

        if src.storage_type == dst.storage_type && Arc::ptr_eq(&src.driver, &dst.driver) {
            return match src.driver.copy_item(&src.sub_path, &dst.sub_path).await {
                Ok(CopyResult::Success { .. }) => ItemOutcome::Success { bytes_transferred: 0 },
                Ok(CopyResult::Skipped { reason, .. }) => ItemOutcome::Skipped { reason },
                Ok(CopyResult::Failed { message, .. }) => ItemOutcome::Failed {
                    message: message.unwrap_or_else(|| "copy_item failed".to_owned()),
                },
                Err(err) => ItemOutcome::Failed { message: err.to_string() },
            };
        }

        let descriptor = match src.driver.download_file(&src.sub_path).await {
            Ok(d) => d,
            Err(err) => return ItemOutcome::Failed { message: err.to_string() },
        };
        let content_type = descriptor.content_type().map(|s| s.to_owned());
        let mut handle = match descriptor.get_stream(cancel.clone()).await {
            Ok(h) => h,
            Err(err) => return ItemOutcome::Failed { message: err.to_string() },
        };

        let mut buffer = BytesMut::new();
        while let Some(chunk) = handle.stream.next().await {
            match chunk {
                Ok(bytes) => buffer.extend_from_slice(&bytes),
                Err(err) => {
                    handle.close();
                    return ItemOutcome::Failed { message: err.to_string() };
                }
            }
            if cancel.is_cancelled() {
                handle.close();
                return ItemOutcome::Failed { message: "cancelled".to_owned() };
            }
        }
        handle.close();

        let content = buffer.freeze();
        let size = content.len() as u64;
        if let Err(err) = self.resolver.check_admission(&dst.storage_config_id, size).await {
            return ItemOutcome::Failed { message: err.to_string() };
        }
        let expected_digest = Digest::of_bytes(&content);
        if let Err(err) = dst.driver.upload_file(&dst.sub_path, content, content_type.as_deref()).await {
            return ItemOutcome::Failed { message: err.to_string() };
        }
        if let Ok(verify) = dst.driver.download_file(&dst.sub_path).await {
            if let Some(actual_etag) = verify.etag() {
                if actual_etag != expected_digest.etag() {
                    return ItemOutcome::Failed {
                        message: format!("copy verification failed: digest mismatch writing `{target}`"),
                    };
                }
            }
        }
        ItemOutcome::Success { bytes_transferred: size }
    }
}

pub struct CopyHandler {
    resolver: Arc<dyn PathResolver>,
    engine: Arc<TaskEngine>,
    /// Remembers each job's source/target pairs so an admin retry (§4.6 `allowed_actions`) can
    /// rebuild the same worker without the caller resubmitting the whole item list.
    pairs_by_job: AsyncMutex<HashMap<String, HashMap<String, (String, String)>>>,
}

impl CopyHandler {
    pub fn new(resolver: Arc<dyn PathResolver>, max_concurrent_items: usize) -> Self {
        CopyHandler {
            resolver,
            engine: Arc::new(TaskEngine::new(max_concurrent_items)),
            pairs_by_job: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Drives the copy engine directly for an ad-hoc (non-cron) submission, bypassing the
    /// `Handler::run`/`scheduled_job_runs` bookkeeping the leased scheduler uses for its fixed
    /// handler set.
    pub async fn submit_adhoc(&self, job_id: &str, payload: Value) -> Result<JobState, SchedulerError> {
        let ctx = HandlerContext {
            task_id: job_id.to_owned(),
            run_id: job_id.to_owned(),
            payload,
            cancel: CancellationToken::new(),
        };
        let value = self.run(ctx).await?;
        serde_json::from_value(value).map_err(|err| SchedulerError::Storage(StorageError::validation(err.to_string())))
    }

    pub async fn state(&self, job_id: &str) -> Option<JobState> {
        self.engine.state(job_id).await
    }

    pub async fn cancel(&self, job_id: &str) -> bool {
        self.engine.cancel(job_id).await
    }

    pub async fn retry(&self, job_id: &str, action: RetryAction) -> Result<JobState, SchedulerError> {
        let pairs = self
            .pairs_by_job
            .lock()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| SchedulerError::Storage(StorageError::not_found(format!("no copy job `{job_id}` to retry"))))?;
        let worker: Arc<dyn ItemWorker> = Arc::new(CopyItemWorker {
            resolver: self.resolver.clone(),
            pairs,
        });
        self.engine.retry(job_id, action, worker).await;
        self.engine
            .state(job_id)
            .await
            .ok_or_else(|| SchedulerError::Storage(StorageError::not_found(format!("copy job `{job_id}` vanished after retry"))))
    }
}

#[async_trait]
impl Handler for CopyHandler {
    fn name(&self) -> &'static str {
        "copy"
    }

    async fn run(&self, ctx: HandlerContext) -> Result<Value, SchedulerError> {
        let items = ctx.payload.get("items").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let user_id = ctx.payload.get("user_id").and_then(|v| v.as_str()).unwrap_or("system").to_owned();
        let allow_parallel = ctx.payload.get("allow_parallel").and_then(|v| v.as_bool()).unwrap_or(false);

        let mut pairs = HashMap::with_capacity(items.len());
        let mut item_ids = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            let item_id = item.get("item_id").and_then(|v| v.as_str()).map(str::to_owned).unwrap_or_else(|| idx.to_string());
            let source = item
                .get("source")
                .and_then(|v| v.as_str())
                .ok_or_else(|| SchedulerError::Storage(StorageError::validation("copy item is missing `source`")))?
                .to_owned();
            let target = item
                .get("target")
                .and_then(|v| v.as_str())
                .ok_or_else(|| SchedulerError::Storage(StorageError::validation("copy item is missing `target`")))?
                .to_owned();
            pairs.insert(item_id.clone(), (source, target));
            item_ids.push(item_id);
        }

        self.pairs_by_job.lock().await.insert(ctx.run_id.clone(), pairs.clone());
        let worker: Arc<dyn ItemWorker> = Arc::new(CopyItemWorker {
            resolver: self.resolver.clone(),
            pairs,
        });
        let submission = JobSubmission {
            job_id: ctx.run_id.clone(),
            task_type: "copy".to_owned(),
            user_id,
            trigger_type: TriggerType::Scheduled,
            payload: ctx.payload.clone(),
            allowed_actions: vec!["retry-all-failed".to_owned(), "retry-file".to_owned()],
            allow_parallel,
        };
        self.engine
            .submit(submission, item_ids, worker)
            .await
            .map_err(|msg| SchedulerError::Storage(StorageError::busy(msg)))?;

        let state = self
            .engine
            .state(&ctx.run_id)
            .await
            .ok_or_else(|| SchedulerError::Storage(StorageError::not_found("copy job state vanished after completion")))?;
        serde_json::to_value(&state).map_err(|err| SchedulerError::Storage(StorageError::validation(err.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;
    use storage::capability::Capability;
    use storage::contract::{BoxStreamDescriptor, UploadFileResult};
    use storage::stream::{RangeFallbackPolicy, StreamHandle};
    use tokio::sync::Mutex as AsyncMutex;

    struct FixedDescriptor {
        content_type: Option<String>,
        data: Vec<u8>,
        etag: Option<String>,
    }

    #[async_trait]
    impl storage::stream::StreamDescriptor for FixedDescriptor {
        fn size(&self) -> Option<u64> {
            Some(self.data.len() as u64)
        }
        fn content_type(&self) -> Option<&str> {
            self.content_type.as_deref()
        }
        fn etag(&self) -> Option<&str> {
            self.etag.as_deref()
        }
        fn last_modified(&self) -> Option<i64> {
            None
        }
        fn range_fallback_policy(&self) -> RangeFallbackPolicy {
            RangeFallbackPolicy::Full
        }
        async fn get_stream(&self, cancel: CancellationToken) -> Result<StreamHandle, StorageError> {
            let data = self.data.clone();
            let stream = futures::stream::once(async move { Ok(Bytes::from(data)) });
            Ok(StreamHandle::new(Box::pin(stream), cancel))
        }
    }

    /// A driver whose `download_file` reports a digest-based etag computed from whatever bytes
    /// are actually stored, so the cross-backend verification path in `CopyItemWorker` has a
    /// realistic target to check against. `corrupt` flips a byte on write to exercise the
    /// mismatch branch.
    struct FakeDriver {
        type_name: &'static str,
        store: AsyncMutex<StdHashMap<String, Bytes>>,
        corrupt: bool,
    }

    impl FakeDriver {
        fn new(type_name: &'static str) -> Self {
            FakeDriver {
                type_name,
                store: AsyncMutex::new(StdHashMap::new()),
                corrupt: false,
            }
        }

        fn seeded(type_name: &'static str, path: &str, data: &[u8]) -> Self {
            let mut map = StdHashMap::new();
            map.insert(path.to_owned(), Bytes::copy_from_slice(data));
            FakeDriver {
                type_name,
                store: AsyncMutex::new(map),
                corrupt: false,
            }
        }

        fn corrupting(type_name: &'static str) -> Self {
            FakeDriver {
                corrupt: true,
                ..FakeDriver::new(type_name)
            }
        }
    }

    #[async_trait]
    impl Driver for FakeDriver {
        fn get_type(&self) -> &str {
            self.type_name
        }
        fn get_capabilities(&self) -> &[Capability] {
            &[]
        }

        async fn download_file(&self, path: &str) -> Result<BoxStreamDescriptor, StorageError> {
            let store = self.store.lock().await;
            let data = store.get(path).cloned().ok_or_else(|| StorageError::not_found(path.to_owned()))?;
            let etag = Some(Digest::of_bytes(&data).etag());
            Ok(Box::new(FixedDescriptor {
                content_type: Some("application/octet-stream".to_owned()),
                data: data.to_vec(),
                etag,
            }))
        }

        async fn upload_file(&self, path: &str, mut content: Bytes, _content_type: Option<&str>) -> Result<UploadFileResult, StorageError> {
            if self.corrupt && !content.is_empty() {
                let mut bytes = content.to_vec();
                let last = bytes.len() - 1;
                bytes[last] ^= 0xff;
                content = Bytes::from(bytes);
            }
            self.store.lock().await.insert(path.to_owned(), content);
            Ok(UploadFileResult {
                success: true,
                storage_path: path.to_owned(),
                message: None,
            })
        }

        async fn copy_item(&self, source: &str, target: &str) -> Result<CopyResult, StorageError> {
            let mut store = self.store.lock().await;
            let Some(data) = store.get(source).cloned() else {
                return Ok(CopyResult::Failed {
                    source: source.to_owned(),
                    target: target.to_owned(),
                    message: Some("source not found".to_owned()),
                });
            };
            store.insert(target.to_owned(), data);
            Ok(CopyResult::Success {
                source: source.to_owned(),
                target: target.to_owned(),
                message: None,
            })
        }

    }

    struct FakeResolver {
        drivers: StdHashMap<&'static str, Arc<FakeDriver>>,
        deny_admission_for: Option<&'static str>,
    }

    impl FakeResolver {
        fn new(drivers: StdHashMap<&'static str, Arc<FakeDriver>>) -> Self {
            FakeResolver {
                drivers,
                deny_admission_for: None,
            }
        }
    }

    #[async_trait]
    impl PathResolver for FakeResolver {
        async fn resolve(&self, logical_path: &str) -> Result<ResolvedPath, StorageError> {
            let mut parts = logical_path.trim_start_matches('/').splitn(2, '/');
            let mount = parts.next().unwrap_or_default();
            let sub_path = format!("/{}", parts.next().unwrap_or_default());
            let driver = self
                .drivers
                .get(mount)
                .cloned()
                .ok_or_else(|| StorageError::not_found(format!("no mount `{mount}`")))?;
            let storage_type = driver.get_type().to_owned();
            Ok(ResolvedPath {
                storage_type,
                storage_config_id: mount.to_owned(),
                driver,
                sub_path,
            })
        }

        async fn check_admission(&self, storage_config_id: &str, _incoming_bytes: u64) -> Result<(), StorageError> {
            if self.deny_admission_for == Some(storage_config_id) {
                return Err(StorageError::validation("storage full"));
            }
            Ok(())
        }
    }

    fn ctx(payload: Value) -> HandlerContext {
        HandlerContext {
            task_id: "t1".to_owned(),
            run_id: "r1".to_owned(),
            payload,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn same_driver_copy_uses_copy_item_directly() {
        let driver = Arc::new(FakeDriver::seeded("MEMORY", "/a", b"hello"));
        let mut drivers = StdHashMap::new();
        drivers.insert("memA", driver);
        let resolver = Arc::new(FakeResolver::new(drivers));
        let handler = CopyHandler::new(resolver, 4);

        let payload = json!({"items": [{"item_id": "i1", "source": "/memA/a", "target": "/memA/b"}]});
        let result = handler.run(ctx(payload)).await.unwrap();
        assert_eq!(result["overall_status"], json!("success"));
    }

    #[tokio::test]
    async fn cross_driver_copy_buffers_then_uploads() {
        let source_driver = Arc::new(FakeDriver::seeded("MEMORY", "/a", b"payload"));
        let target_driver = Arc::new(FakeDriver::new("LOCAL"));
        let mut drivers = StdHashMap::new();
        drivers.insert("memA", source_driver);
        drivers.insert("localB", target_driver.clone());
        let resolver = Arc::new(FakeResolver::new(drivers));
        let handler = CopyHandler::new(resolver, 4);

        let payload = json!({"items": [{"item_id": "i1", "source": "/memA/a", "target": "/localB/b"}]});
        let result = handler.run(ctx(payload)).await.unwrap();
        assert_eq!(result["overall_status"], json!("success"));
        let stored = target_driver.store.lock().await;
        assert_eq!(stored.get("/b").map(|b| b.to_vec()), Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn cross_driver_copy_fails_when_target_content_does_not_match_the_source_digest() {
        let source_driver = Arc::new(FakeDriver::seeded("MEMORY", "/a", b"payload"));
        let target_driver = Arc::new(FakeDriver::corrupting("LOCAL"));
        let mut drivers = StdHashMap::new();
        drivers.insert("memA", source_driver);
        drivers.insert("localB", target_driver);
        let resolver = Arc::new(FakeResolver::new(drivers));
        let handler = CopyHandler::new(resolver, 4);

        let payload = json!({"items": [{"item_id": "i1", "source": "/memA/a", "target": "/localB/b"}]});
        let result = handler.run(ctx(payload)).await.unwrap();
        assert_eq!(result["overall_status"], json!("partial"));
    }

    #[tokio::test]
    async fn missing_source_yields_failed_item_and_partial_overall_status() {
        let source_driver = Arc::new(FakeDriver::new("MEMORY"));
        let target_driver = Arc::new(FakeDriver::new("LOCAL"));
        let mut drivers = StdHashMap::new();
        drivers.insert("memA", source_driver);
        drivers.insert("localB", target_driver);
        let resolver = Arc::new(FakeResolver::new(drivers));
        let handler = CopyHandler::new(resolver, 4);

        let payload = json!({"items": [{"item_id": "i1", "source": "/memA/missing", "target": "/localB/b"}]});
        let result = handler.run(ctx(payload)).await.unwrap();
        assert_eq!(result["overall_status"], json!("partial"));
    }

    #[tokio::test]
    async fn admission_guard_rejects_cross_backend_upload_over_quota() {
        let source_driver = Arc::new(FakeDriver::seeded("MEMORY", "/a", b"payload"));
        let target_driver = Arc::new(FakeDriver::new("LOCAL"));
        let mut drivers = StdHashMap::new();
        drivers.insert("memA", source_driver);
        drivers.insert("localB", target_driver.clone());
        let resolver = Arc::new(FakeResolver {
            deny_admission_for: Some("localB"),
            ..FakeResolver::new(drivers)
        });
        let handler = CopyHandler::new(resolver, 4);

        let payload = json!({"items": [{"item_id": "i1", "source": "/memA/a", "target": "/localB/b"}]});
        let result = handler.run(ctx(payload)).await.unwrap();
        assert_eq!(result["overall_status"], json!("partial"));
        assert!(target_driver.store.lock().await.get("/b").is_none());
    }
}
