// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Test-only driver mocks, in the spirit of the production code's own `CountMethodCallsStorage`
//! idiom: a configurable stand-in driver used to exercise the registry and enforcer without a
//! real backend.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::capability::Capability;
use crate::contract::{
    CopyResult, CreateDirectoryResult, Driver, FileInfo, ListDirectoryResult, RenameResult,
    UpdateFileResult, UploadFileResult,
};
use crate::error::StorageError;

/// A driver whose behavior can be perturbed field-by-field to provoke specific contract
/// violations in tests, and which counts calls per method the way the teacher's
/// `CountMethodCallsStorage` does.
pub struct MockDriver {
    storage_type: String,
    capabilities: Vec<Capability>,
    pub file_info_path_override: Option<String>,
    pub skip_copy_without_reason: bool,
    pub list_directory_calls: AtomicUsize,
}

impl MockDriver {
    pub fn new(storage_type: impl Into<String>, capabilities: Vec<Capability>) -> Self {
        MockDriver {
            storage_type: storage_type.into(),
            capabilities,
            file_info_path_override: None,
            skip_copy_without_reason: false,
            list_directory_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn get_type(&self) -> &str {
        &self.storage_type
    }

    fn get_capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    fn implemented_methods(&self) -> &'static [&'static str] {
        &["listDirectory", "getFileInfo", "downloadFile"]
    }

    async fn list_directory(&self, path: &str) -> Result<ListDirectoryResult, StorageError> {
        self.list_directory_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ListDirectoryResult {
            path: path.to_owned(),
            items: vec![],
        })
    }

    async fn get_file_info(&self, path: &str) -> Result<FileInfo, StorageError> {
        Ok(FileInfo {
            path: self
                .file_info_path_override
                .clone()
                .unwrap_or_else(|| path.to_owned()),
            name: path.rsplit('/').next().unwrap_or(path).to_owned(),
            is_directory: false,
            size: Some(0),
            modified: None,
            extra: serde_json::Value::Null,
        })
    }

    async fn upload_file(
        &self,
        path: &str,
        _content: Bytes,
        _content_type: Option<&str>,
    ) -> Result<UploadFileResult, StorageError> {
        Ok(UploadFileResult {
            success: true,
            storage_path: path.to_owned(),
            message: None,
        })
    }

    async fn update_file(&self, path: &str, _content: Bytes) -> Result<UpdateFileResult, StorageError> {
        Ok(UpdateFileResult {
            success: true,
            path: path.to_owned(),
            message: None,
        })
    }

    async fn create_directory(&self, path: &str) -> Result<CreateDirectoryResult, StorageError> {
        Ok(CreateDirectoryResult {
            success: true,
            path: path.to_owned(),
            already_exists: Some(false),
        })
    }

    async fn rename_item(&self, source: &str, target: &str) -> Result<RenameResult, StorageError> {
        Ok(RenameResult {
            success: true,
            source: source.to_owned(),
            target: target.to_owned(),
            message: None,
        })
    }

    async fn copy_item(&self, source: &str, target: &str) -> Result<CopyResult, StorageError> {
        if self.skip_copy_without_reason {
            return Ok(CopyResult::Skipped {
                source: source.to_owned(),
                target: target.to_owned(),
                reason: String::new(),
            });
        }
        Ok(CopyResult::Success {
            source: source.to_owned(),
            target: target.to_owned(),
            message: None,
        })
    }
}
