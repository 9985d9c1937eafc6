// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use serde::{Deserialize, Serialize};

/// A named feature set a driver advertises; dictates which methods must exist (§4.1, §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    Reader,
    Writer,
    DirectLink,
    Multipart,
    Atomic,
    Proxy,
    PagedList,
}

impl Capability {
    /// The method names the Contract (§4.1) requires a driver to implement once it advertises
    /// this capability. Used only for diagnostics in `ContractDetails`; the actual requirement
    /// is enforced by Rust's type system through the `Driver` trait's associated methods plus
    /// the `capabilities()` gate the Enforcer checks before dispatch.
    pub fn required_methods(self) -> &'static [&'static str] {
        match self {
            Capability::Writer => &[
                "uploadFile",
                "updateFile",
                "createDirectory",
                "renameItem",
                "copyItem",
                "batchRemoveItems",
            ],
            Capability::Reader => &["listDirectory", "getFileInfo", "downloadFile"],
            Capability::DirectLink => &["generateDownloadUrl"],
            Capability::Proxy => &["generateProxyUrl"],
            Capability::Multipart => &[
                "initializeFrontendMultipartUpload",
                "signMultipartParts",
                "listMultipartUploads",
                "listMultipartParts",
                "completeFrontendMultipartUpload",
                "abortFrontendMultipartUpload",
                "proxyFrontendMultipartChunk",
            ],
            Capability::Atomic => &["renameItem"],
            Capability::PagedList => &["listDirectory"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Reader => "READER",
            Capability::Writer => "WRITER",
            Capability::DirectLink => "DIRECT_LINK",
            Capability::Multipart => "MULTIPART",
            Capability::Atomic => "ATOMIC",
            Capability::Proxy => "PROXY",
            Capability::PagedList => "PAGED_LIST",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Capability;

    #[test]
    fn writer_requires_the_documented_methods() {
        assert_eq!(
            Capability::Writer.required_methods(),
            &[
                "uploadFile",
                "updateFile",
                "createDirectory",
                "renameItem",
                "copyItem",
                "batchRemoveItems",
            ]
        );
    }
}
