// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Contract Enforcer (§4.1 component B): a transparent wrapper around a constructed `Driver`
//! that validates pre-call path coherence and post-call return shape on every dispatch.
//!
//! Because `Driver` methods in this codebase take each path as a single typed parameter (rather
//! than a duplicated `subPath` positional plus an `options.subPath`/`options.path`), the
//! "both representations present and equal" half of the source's pre-call check collapses by
//! construction -- there is only one representation to begin with. What remains, and what the
//! Enforcer still checks here, are the invariants no Rust type signature can express on its
//! own: that a path argument is non-empty, that a driver's return value actually echoes back
//! the path it was asked to act on, and that a `copyItem` "skipped" result always carries a
//! reason.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::capability::Capability;
use crate::contract::{
    BatchRemoveResult, CompleteMultipartResult, CopyResult, CreateDirectoryResult, Driver,
    DownloadUrlResult, FileInfo, ListDirectoryResult, MultipartInitResult, MultipartPartSummary,
    MultipartUploadSummary, ProviderStats, ProxyUrlResult, RenameResult, SignMultipartPartsResult,
    UpdateFileResult, UploadFileResult, UploadUrlResult,
};
use crate::error::StorageError;
use crate::stream::BoxStreamDescriptor;

fn require_nonempty_path(path: &str) -> Result<(), StorageError> {
    if path.is_empty() {
        return Err(StorageError::validation("path must be a non-empty string"));
    }
    Ok(())
}

fn require_path_echo(method: &str, expected: &str, actual: &str) -> Result<(), StorageError> {
    if expected != actual {
        return Err(StorageError::DriverContract {
            storage_type: "?".to_owned(),
            message: format!(
                "driver method `{method}` returned path `{actual}` but was called with `{expected}`"
            ),
            details: crate::error::ContractDetails {
                note: Some(format!("{method}: path mismatch")),
                ..Default::default()
            },
        });
    }
    Ok(())
}

pub struct EnforcedDriver {
    inner: Arc<dyn Driver>,
}

impl EnforcedDriver {
    pub fn new(inner: Arc<dyn Driver>) -> Self {
        EnforcedDriver { inner }
    }

    pub fn inner(&self) -> Arc<dyn Driver> {
        Arc::clone(&self.inner)
    }
}

#[async_trait]
impl Driver for EnforcedDriver {
    fn get_type(&self) -> &str {
        self.inner.get_type()
    }

    fn get_capabilities(&self) -> &[Capability] {
        self.inner.get_capabilities()
    }

    async fn list_directory(&self, path: &str) -> Result<ListDirectoryResult, StorageError> {
        require_nonempty_path(path)?;
        let result = self.inner.list_directory(path).await?;
        require_path_echo("listDirectory", path, &result.path)?;
        Ok(result)
    }

    async fn get_file_info(&self, path: &str) -> Result<FileInfo, StorageError> {
        require_nonempty_path(path)?;
        let result = self.inner.get_file_info(path).await?;
        require_path_echo("getFileInfo", path, &result.path)?;
        Ok(result)
    }

    async fn download_file(&self, path: &str) -> Result<BoxStreamDescriptor, StorageError> {
        require_nonempty_path(path)?;
        self.inner.download_file(path).await
    }

    async fn upload_file(
        &self,
        path: &str,
        content: Bytes,
        content_type: Option<&str>,
    ) -> Result<UploadFileResult, StorageError> {
        require_nonempty_path(path)?;
        self.inner.upload_file(path, content, content_type).await
    }

    async fn update_file(&self, path: &str, content: Bytes) -> Result<UpdateFileResult, StorageError> {
        require_nonempty_path(path)?;
        let result = self.inner.update_file(path, content).await?;
        require_path_echo("updateFile", path, &result.path)?;
        Ok(result)
    }

    async fn create_directory(&self, path: &str) -> Result<CreateDirectoryResult, StorageError> {
        require_nonempty_path(path)?;
        let result = self.inner.create_directory(path).await?;
        require_path_echo("createDirectory", path, &result.path)?;
        Ok(result)
    }

    async fn rename_item(&self, source: &str, target: &str) -> Result<RenameResult, StorageError> {
        require_nonempty_path(source)?;
        require_nonempty_path(target)?;
        let result = self.inner.rename_item(source, target).await?;
        require_path_echo("renameItem.source", source, &result.source)?;
        require_path_echo("renameItem.target", target, &result.target)?;
        Ok(result)
    }

    async fn copy_item(&self, source: &str, target: &str) -> Result<CopyResult, StorageError> {
        require_nonempty_path(source)?;
        require_nonempty_path(target)?;
        let result = self.inner.copy_item(source, target).await?;
        require_path_echo("copyItem.source", source, result.source())?;
        require_path_echo("copyItem.target", target, result.target())?;
        if let CopyResult::Skipped { reason, .. } = &result {
            if reason.is_empty() {
                return Err(StorageError::DriverContract {
                    storage_type: self.inner.get_type().to_owned(),
                    message: "copyItem returned status=skipped with an empty reason".to_owned(),
                    details: Default::default(),
                });
            }
        }
        Ok(result)
    }

    async fn batch_remove_items(&self, paths: &[String]) -> Result<BatchRemoveResult, StorageError> {
        self.inner.batch_remove_items(paths).await
    }

    async fn generate_download_url(&self, path: &str) -> Result<DownloadUrlResult, StorageError> {
        require_nonempty_path(path)?;
        self.inner.generate_download_url(path).await
    }

    async fn generate_proxy_url(&self, path: &str) -> Result<ProxyUrlResult, StorageError> {
        require_nonempty_path(path)?;
        self.inner.generate_proxy_url(path).await
    }

    async fn generate_upload_url(&self, path: &str) -> Result<UploadUrlResult, StorageError> {
        require_nonempty_path(path)?;
        let result = self.inner.generate_upload_url(path).await?;
        if result.upload_url.is_empty() && result.skip_upload != Some(true) {
            return Err(StorageError::DriverContract {
                storage_type: self.inner.get_type().to_owned(),
                message: "generateUploadUrl returned an empty uploadUrl without skipUpload"
                    .to_owned(),
                details: Default::default(),
            });
        }
        Ok(result)
    }

    async fn initialize_multipart_upload(
        &self,
        path: &str,
        size: u64,
    ) -> Result<MultipartInitResult, StorageError> {
        require_nonempty_path(path)?;
        self.inner.initialize_multipart_upload(path, size).await
    }

    async fn sign_multipart_parts(
        &self,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> Result<SignMultipartPartsResult, StorageError> {
        self.inner.sign_multipart_parts(upload_id, part_numbers).await
    }

    async fn list_multipart_uploads(
        &self,
        path: &str,
    ) -> Result<Vec<MultipartUploadSummary>, StorageError> {
        self.inner.list_multipart_uploads(path).await
    }

    async fn list_multipart_parts(
        &self,
        upload_id: &str,
    ) -> Result<Vec<MultipartPartSummary>, StorageError> {
        self.inner.list_multipart_parts(upload_id).await
    }

    async fn complete_multipart_upload(
        &self,
        upload_id: &str,
    ) -> Result<CompleteMultipartResult, StorageError> {
        self.inner.complete_multipart_upload(upload_id).await
    }

    async fn abort_multipart_upload(&self, upload_id: &str) -> Result<(), StorageError> {
        self.inner.abort_multipart_upload(upload_id).await
    }

    async fn proxy_multipart_chunk(
        &self,
        upload_id: &str,
        part_number: u32,
        chunk: Bytes,
    ) -> Result<(), StorageError> {
        self.inner
            .proxy_multipart_chunk(upload_id, part_number, chunk)
            .await
    }

    async fn get_stats(&self, cancel: CancellationToken) -> Option<ProviderStats> {
        self.inner.get_stats(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testutil::MockDriver;

    #[tokio::test]
    async fn rejects_empty_path() {
        let enforced = EnforcedDriver::new(Arc::new(MockDriver::new(
            "MOCK",
            vec![Capability::Reader],
        )));
        let err = enforced.get_file_info("").await.unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_path_mismatch_in_return_value() {
        let mut driver = MockDriver::new("MOCK", vec![Capability::Reader]);
        driver.file_info_path_override = Some("/other".to_owned());
        let enforced = EnforcedDriver::new(Arc::new(driver));
        let err = enforced.get_file_info("/mine").await.unwrap_err();
        assert!(matches!(err, StorageError::DriverContract { .. }));
    }

    #[tokio::test]
    async fn rejects_skipped_copy_without_reason() {
        let mut driver = MockDriver::new("MOCK", vec![Capability::Writer]);
        driver.skip_copy_without_reason = true;
        let enforced = EnforcedDriver::new(Arc::new(driver));
        let err = enforced.copy_item("/a", "/b").await.unwrap_err();
        assert!(matches!(err, StorageError::DriverContract { .. }));
        let _ = json!({});
    }
}
