// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Duck-typed driver boundary -> capability-tagged variants + contract validator (§9, §4.1).
//!
//! `Driver` is a single object-safe trait carrying every method any capability might require.
//! A driver overrides only the methods implied by the capabilities it advertises; every other
//! method's default body returns [`StorageError::not_supported`]. The `Enforcer` (`enforcer.rs`)
//! still performs the runtime checks the original design names, because they are semantic
//! invariants the type system alone cannot express (e.g. `path === ctx.path`, or that a
//! `CopyResult::Skipped` always carries a `reason`).

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::capability::Capability;
use crate::error::StorageError;
use crate::stream::BoxStreamDescriptor;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirEntry {
    pub path: String,
    pub name: String,
    pub is_directory: bool,
    pub size: Option<u64>,
    pub modified: Option<i64>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extra: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListDirectoryResult {
    pub path: String,
    pub items: Vec<DirEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub name: String,
    pub is_directory: bool,
    pub size: Option<u64>,
    pub modified: Option<i64>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extra: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateDirectoryResult {
    pub success: bool,
    pub path: String,
    pub already_exists: Option<bool>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadFileResult {
    pub success: bool,
    pub storage_path: String,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateFileResult {
    pub success: bool,
    pub path: String,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RenameResult {
    pub success: bool,
    pub source: String,
    pub target: String,
    pub message: Option<String>,
}

/// `copyItem`'s result. The "forbidden fields" rule in §4.1 (`error`/`success` must not appear
/// alongside a `skipped` status) is enforced by construction here: there simply is no `success`
/// or `error` field on this type. The one invariant the type system can't express -- that
/// `Skipped` always carries a non-empty `reason` -- is still checked by the Enforcer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CopyResult {
    Success {
        source: String,
        target: String,
        message: Option<String>,
    },
    Skipped {
        source: String,
        target: String,
        reason: String,
    },
    Failed {
        source: String,
        target: String,
        message: Option<String>,
    },
}

impl CopyResult {
    pub fn source(&self) -> &str {
        match self {
            CopyResult::Success { source, .. }
            | CopyResult::Skipped { source, .. }
            | CopyResult::Failed { source, .. } => source,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            CopyResult::Success { target, .. }
            | CopyResult::Skipped { target, .. }
            | CopyResult::Failed { target, .. } => target,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedRemoval {
    pub path: String,
    pub error: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchRemoveResult {
    pub success: u64,
    pub failed: Vec<FailedRemoval>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadUrlType {
    CustomHost,
    NativeDirect,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadUrlResult {
    pub url: String,
    #[serde(rename = "type")]
    pub url_type: DownloadUrlType,
    pub expires_in: Option<u64>,
    pub expires_at: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyUrlResult {
    pub url: String,
    pub channel: Option<String>,
    pub expires_in: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadUrlResult {
    /// Allowed to be empty only when `skip_upload == Some(true)` (the driver does an immediate
    /// server-side write rather than handing the client a PUT target).
    pub upload_url: String,
    pub storage_path: String,
    pub headers: Option<std::collections::HashMap<String, String>>,
    pub content_type: Option<String>,
    pub expires_in: Option<u64>,
    pub skip_upload: Option<bool>,
}

/// Strategy-specific required fields (§4.1) are modeled as enum variants so a driver cannot
/// construct a `per_part_url` result missing its part URLs -- the compiler enforces it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum MultipartInitResult {
    PerPartUrl {
        upload_id: String,
        part_size: u64,
    },
    SingleSession {
        upload_id: String,
        session_upload_url: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedPart {
    pub part_number: u32,
    pub upload_url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignMultipartPartsResult {
    pub upload_id: String,
    pub parts: Vec<SignedPart>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultipartUploadSummary {
    pub upload_id: String,
    pub storage_path: String,
    pub initiated_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultipartPartSummary {
    pub part_number: u32,
    pub size: u64,
    pub etag: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompleteMultipartResult {
    pub success: bool,
    pub storage_path: String,
    pub message: Option<String>,
}

/// Identifying metadata about a registered backend type (`getType`/`getCapabilities` in §4.1).
pub struct DriverMeta {
    pub storage_type: String,
    pub capabilities: Vec<Capability>,
}

/// Base contract on every driver (§4.1): `getType()`, `getCapabilities()`, and an optional
/// async `initialize()` plus every capability-implied method, each defaulting to
/// "not supported" until a concrete backend overrides it.
#[async_trait]
pub trait Driver: Send + Sync {
    fn get_type(&self) -> &str;
    fn get_capabilities(&self) -> &[Capability];

    /// The contract method names this driver actually overrides. The registry's
    /// `create_driver` checks this against `Capability::required_methods()` for every
    /// capability the driver advertises -- the runtime stand-in for the method-existence
    /// check the source performs via duck typing (§4.1 Creation), since Rust's default-method
    /// trait design means every method "exists" whether or not a concrete driver meaningfully
    /// implements it.
    fn implemented_methods(&self) -> &'static [&'static str] {
        &[]
    }

    async fn initialize(&self) -> Result<(), StorageError> {
        Ok(())
    }

    // --- READER ---

    async fn list_directory(&self, _path: &str) -> Result<ListDirectoryResult, StorageError> {
        Err(StorageError::not_supported("listDirectory"))
    }

    async fn get_file_info(&self, _path: &str) -> Result<FileInfo, StorageError> {
        Err(StorageError::not_supported("getFileInfo"))
    }

    async fn download_file(&self, _path: &str) -> Result<BoxStreamDescriptor, StorageError> {
        Err(StorageError::not_supported("downloadFile"))
    }

    // --- WRITER ---

    async fn upload_file(
        &self,
        _path: &str,
        _content: Bytes,
        _content_type: Option<&str>,
    ) -> Result<UploadFileResult, StorageError> {
        Err(StorageError::not_supported("uploadFile"))
    }

    async fn update_file(
        &self,
        _path: &str,
        _content: Bytes,
    ) -> Result<UpdateFileResult, StorageError> {
        Err(StorageError::not_supported("updateFile"))
    }

    async fn create_directory(&self, _path: &str) -> Result<CreateDirectoryResult, StorageError> {
        Err(StorageError::not_supported("createDirectory"))
    }

    async fn rename_item(&self, _source: &str, _target: &str) -> Result<RenameResult, StorageError> {
        Err(StorageError::not_supported("renameItem"))
    }

    async fn copy_item(&self, _source: &str, _target: &str) -> Result<CopyResult, StorageError> {
        Err(StorageError::not_supported("copyItem"))
    }

    async fn batch_remove_items(
        &self,
        _paths: &[String],
    ) -> Result<BatchRemoveResult, StorageError> {
        Err(StorageError::not_supported("batchRemoveItems"))
    }

    // --- DIRECT_LINK ---

    async fn generate_download_url(
        &self,
        _path: &str,
    ) -> Result<DownloadUrlResult, StorageError> {
        Err(StorageError::not_supported("generateDownloadUrl"))
    }

    // --- PROXY ---

    async fn generate_proxy_url(&self, _path: &str) -> Result<ProxyUrlResult, StorageError> {
        Err(StorageError::not_supported("generateProxyUrl"))
    }

    async fn generate_upload_url(&self, _path: &str) -> Result<UploadUrlResult, StorageError> {
        Err(StorageError::not_supported("generateUploadUrl"))
    }

    // --- MULTIPART ---

    async fn initialize_multipart_upload(
        &self,
        _path: &str,
        _size: u64,
    ) -> Result<MultipartInitResult, StorageError> {
        Err(StorageError::not_supported(
            "initializeFrontendMultipartUpload",
        ))
    }

    async fn sign_multipart_parts(
        &self,
        _upload_id: &str,
        _part_numbers: &[u32],
    ) -> Result<SignMultipartPartsResult, StorageError> {
        Err(StorageError::not_supported("signMultipartParts"))
    }

    async fn list_multipart_uploads(
        &self,
        _path: &str,
    ) -> Result<Vec<MultipartUploadSummary>, StorageError> {
        Err(StorageError::not_supported("listMultipartUploads"))
    }

    async fn list_multipart_parts(
        &self,
        _upload_id: &str,
    ) -> Result<Vec<MultipartPartSummary>, StorageError> {
        Err(StorageError::not_supported("listMultipartParts"))
    }

    async fn complete_multipart_upload(
        &self,
        _upload_id: &str,
    ) -> Result<CompleteMultipartResult, StorageError> {
        Err(StorageError::not_supported(
            "completeFrontendMultipartUpload",
        ))
    }

    async fn abort_multipart_upload(&self, _upload_id: &str) -> Result<(), StorageError> {
        Err(StorageError::not_supported("abortFrontendMultipartUpload"))
    }

    async fn proxy_multipart_chunk(
        &self,
        _upload_id: &str,
        _part_number: u32,
        _chunk: Bytes,
    ) -> Result<(), StorageError> {
        Err(StorageError::not_supported("proxyFrontendMultipartChunk"))
    }

    /// Provider-reported quota (§4.3 `provider-quota` tier). `None` means the backend does not
    /// expose one; the quota engine falls through to the next tier.
    async fn get_stats(&self, _cancel: CancellationToken) -> Option<ProviderStats> {
        None
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderStats {
    pub total_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
    pub remaining_bytes: Option<u64>,
    pub deleted_bytes: Option<u64>,
    pub trash_bytes: Option<u64>,
    pub drive_bytes: Option<u64>,
    pub percent_used: Option<f64>,
    pub state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::CopyResult;

    #[test]
    fn copy_result_has_no_success_or_error_field() {
        // §4.1: "fields error/success are forbidden" on a skipped copyItem result. Here that's
        // structural: the variant cannot be constructed with either field.
        let skipped = CopyResult::Skipped {
            source: "/a".into(),
            target: "/b".into(),
            reason: "target exists".into(),
        };
        assert_eq!(skipped.source(), "/a");
        assert_eq!(skipped.target(), "/b");
    }
}
