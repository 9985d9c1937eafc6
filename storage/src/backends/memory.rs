// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `MEMORY` driver: an in-process, non-persistent filesystem. Primarily a reference
//! implementation for tests and local development, the way the teacher's own in-memory driver
//! served as the cheapest possible `BlobStorage` to exercise the decorator stack against. Every
//! object carries a `Digest`-derived strong ETag, computed once on write and served unchanged
//! until the next write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use digest::Digest;
use futures::stream;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::capability::Capability;
use crate::contract::{
    BatchRemoveResult, CopyResult, CreateDirectoryResult, Driver, DirEntry, FailedRemoval, FileInfo,
    ListDirectoryResult, RenameResult, UpdateFileResult, UploadFileResult,
};
use crate::error::StorageError;
use crate::stream::{BoxByteStream, BoxStreamDescriptor, RangeFallbackPolicy, StreamDescriptor, StreamHandle};

#[derive(Clone)]
struct Object {
    content: Bytes,
    content_type: Option<String>,
    modified: i64,
    etag: String,
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    format!("/{trimmed}")
}

fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) => "/".to_owned(),
        Some((parent, _)) => parent.to_owned(),
        None => "/".to_owned(),
    }
}

pub struct MemoryDriver {
    objects: RwLock<HashMap<String, Object>>,
    directories: RwLock<std::collections::HashSet<String>>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        let mut directories = std::collections::HashSet::new();
        directories.insert("/".to_owned());
        MemoryDriver {
            objects: RwLock::new(HashMap::new()),
            directories: RwLock::new(directories),
        }
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryStreamDescriptor {
    object: Object,
}

#[async_trait]
impl StreamDescriptor for MemoryStreamDescriptor {
    fn size(&self) -> Option<u64> {
        Some(self.object.content.len() as u64)
    }
    fn content_type(&self) -> Option<&str> {
        self.object.content_type.as_deref()
    }
    fn etag(&self) -> Option<&str> {
        Some(&self.object.etag)
    }
    fn last_modified(&self) -> Option<i64> {
        Some(self.object.modified)
    }
    fn range_fallback_policy(&self) -> RangeFallbackPolicy {
        RangeFallbackPolicy::Software
    }

    async fn get_stream(&self, cancel: CancellationToken) -> Result<StreamHandle, StorageError> {
        let content = self.object.content.clone();
        let s: BoxByteStream = Box::pin(stream::iter(vec![Ok(content)]));
        Ok(StreamHandle::new(s, cancel))
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    fn get_type(&self) -> &str {
        "MEMORY"
    }

    fn get_capabilities(&self) -> &[Capability] {
        &[Capability::Reader, Capability::Writer, Capability::Atomic, Capability::PagedList]
    }

    fn implemented_methods(&self) -> &'static [&'static str] {
        &[
            "listDirectory",
            "getFileInfo",
            "downloadFile",
            "uploadFile",
            "updateFile",
            "createDirectory",
            "renameItem",
            "copyItem",
            "batchRemoveItems",
        ]
    }

    async fn list_directory(&self, path: &str) -> Result<ListDirectoryResult, StorageError> {
        let path = normalize(path);
        let objects = self.objects.read();
        let directories = self.directories.read();
        if path != "/" && !directories.contains(&path) {
            return Err(StorageError::not_found(format!("no such directory: {path}")));
        }
        let prefix = if path == "/" { "/".to_owned() } else { format!("{path}/") };
        let mut items = Vec::new();
        for (obj_path, object) in objects.iter() {
            if let Some(rest) = obj_path.strip_prefix(&prefix) {
                if !rest.contains('/') {
                    items.push(DirEntry {
                        path: obj_path.clone(),
                        name: rest.to_owned(),
                        is_directory: false,
                        size: Some(object.content.len() as u64),
                        modified: Some(object.modified),
                        extra: serde_json::Value::Null,
                    });
                }
            }
        }
        for dir in directories.iter() {
            if let Some(rest) = dir.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    items.push(DirEntry {
                        path: dir.clone(),
                        name: rest.to_owned(),
                        is_directory: true,
                        size: None,
                        modified: None,
                        extra: serde_json::Value::Null,
                    });
                }
            }
        }
        Ok(ListDirectoryResult { path, items })
    }

    async fn get_file_info(&self, path: &str) -> Result<FileInfo, StorageError> {
        let path = normalize(path);
        let objects = self.objects.read();
        let object = objects
            .get(&path)
            .ok_or_else(|| StorageError::not_found(format!("no such object: {path}")))?;
        Ok(FileInfo {
            path: path.clone(),
            name: path.rsplit('/').next().unwrap_or(&path).to_owned(),
            is_directory: false,
            size: Some(object.content.len() as u64),
            modified: Some(object.modified),
            extra: serde_json::Value::Null,
        })
    }

    async fn download_file(&self, path: &str) -> Result<BoxStreamDescriptor, StorageError> {
        let path = normalize(path);
        let objects = self.objects.read();
        let object = objects
            .get(&path)
            .ok_or_else(|| StorageError::not_found(format!("no such object: {path}")))?
            .clone();
        Ok(Box::new(MemoryStreamDescriptor { object }))
    }

    async fn upload_file(
        &self,
        path: &str,
        content: Bytes,
        content_type: Option<&str>,
    ) -> Result<UploadFileResult, StorageError> {
        let path = normalize(path);
        let etag = Digest::of_bytes(&content).etag();
        self.directories.write().insert(parent_dir(&path));
        self.objects.write().insert(
            path.clone(),
            Object {
                content,
                content_type: content_type.map(str::to_owned),
                modified: now_ms(),
                etag,
            },
        );
        Ok(UploadFileResult {
            success: true,
            storage_path: path,
            message: None,
        })
    }

    async fn update_file(&self, path: &str, content: Bytes) -> Result<UpdateFileResult, StorageError> {
        let path = normalize(path);
        let mut objects = self.objects.write();
        let object = objects
            .get_mut(&path)
            .ok_or_else(|| StorageError::not_found(format!("no such object: {path}")))?;
        object.etag = Digest::of_bytes(&content).etag();
        object.content = content;
        object.modified = now_ms();
        Ok(UpdateFileResult {
            success: true,
            path,
            message: None,
        })
    }

    async fn create_directory(&self, path: &str) -> Result<CreateDirectoryResult, StorageError> {
        let path = normalize(path);
        let already_exists = !self.directories.write().insert(path.clone());
        Ok(CreateDirectoryResult {
            success: true,
            path,
            already_exists: Some(already_exists),
        })
    }

    async fn rename_item(&self, source: &str, target: &str) -> Result<RenameResult, StorageError> {
        let source = normalize(source);
        let target = normalize(target);
        let mut objects = self.objects.write();
        let object = objects
            .remove(&source)
            .ok_or_else(|| StorageError::not_found(format!("no such object: {source}")))?;
        objects.insert(target.clone(), object);
        Ok(RenameResult {
            success: true,
            source,
            target,
            message: None,
        })
    }

    async fn copy_item(&self, source: &str, target: &str) -> Result<CopyResult, StorageError> {
        let source_key = normalize(source);
        let target_key = normalize(target);
        let objects_read = self.objects.read();
        let object = match objects_read.get(&source_key) {
            Some(object) => object.clone(),
            None => {
                return Ok(CopyResult::Failed {
                    source: source_key,
                    target: target_key,
                    message: Some("source does not exist".to_owned()),
                })
            }
        };
        drop(objects_read);
        if self.objects.read().contains_key(&target_key) {
            return Ok(CopyResult::Skipped {
                source: source_key,
                target: target_key,
                reason: "target already exists".to_owned(),
            });
        }
        self.objects.write().insert(target_key.clone(), object);
        Ok(CopyResult::Success {
            source: source_key,
            target: target_key,
            message: None,
        })
    }

    async fn batch_remove_items(&self, paths: &[String]) -> Result<BatchRemoveResult, StorageError> {
        let mut objects = self.objects.write();
        let mut success = 0u64;
        let mut failed = Vec::new();
        for path in paths {
            let key = normalize(path);
            if objects.remove(&key).is_some() {
                success += 1;
            } else {
                failed.push(FailedRemoval {
                    path: key,
                    error: "not found".to_owned(),
                });
            }
        }
        Ok(BatchRemoveResult { success, failed })
    }
}

pub type SharedMemoryDriver = Arc<MemoryDriver>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_an_object() {
        let driver = MemoryDriver::new();
        driver
            .upload_file("/a/b.txt", Bytes::from_static(b"hello"), Some("text/plain"))
            .await
            .unwrap();
        let info = driver.get_file_info("/a/b.txt").await.unwrap();
        assert_eq!(info.size, Some(5));
        let listing = driver.list_directory("/a").await.unwrap();
        assert_eq!(listing.items.len(), 1);
        assert_eq!(listing.items[0].name, "b.txt");
    }

    #[tokio::test]
    async fn copy_skips_when_target_exists() {
        let driver = MemoryDriver::new();
        driver.upload_file("/a", Bytes::from_static(b"1"), None).await.unwrap();
        driver.upload_file("/b", Bytes::from_static(b"2"), None).await.unwrap();
        let result = driver.copy_item("/a", "/b").await.unwrap();
        assert!(matches!(result, CopyResult::Skipped { .. }));
    }

    #[tokio::test]
    async fn etag_changes_when_content_changes() {
        let driver = MemoryDriver::new();
        driver.upload_file("/a", Bytes::from_static(b"v1"), None).await.unwrap();
        let first = driver.download_file("/a").await.unwrap().etag().map(str::to_owned);
        driver.update_file("/a", Bytes::from_static(b"v2")).await.unwrap();
        let second = driver.download_file("/a").await.unwrap().etag().map(str::to_owned);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn copy_item_carries_the_source_etag_to_the_target() {
        let driver = MemoryDriver::new();
        driver.upload_file("/a", Bytes::from_static(b"same bytes"), None).await.unwrap();
        driver.copy_item("/a", "/c").await.unwrap();
        let source_etag = driver.download_file("/a").await.unwrap().etag().map(str::to_owned);
        let target_etag = driver.download_file("/c").await.unwrap().etag().map(str::to_owned);
        assert_eq!(source_etag, target_etag);
    }
}
