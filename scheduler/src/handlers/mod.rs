// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The fixed handler set `storagehub` registers against the scheduler's `HandlerRegistry`
//! (§4.4): `storage_usage_refresh`, `fs_index_rebuild`, `fs_index_apply_dirty`, and `copy`. Each
//! handler is parameterized over a narrow facade trait so this crate keeps no compile-time
//! dependency on `storagehub` or on any concrete driver set -- the same shape `storage::quota`
//! uses for `UsageProbes`.

pub mod copy;
pub mod fs_index_apply_dirty;
pub mod fs_index_rebuild;
pub mod storage_usage_refresh;

pub use copy::{CopyHandler, PathResolver, ResolvedPath};
pub use fs_index_apply_dirty::FsIndexApplyDirtyHandler;
pub use fs_index_rebuild::{FsBackend, FsEntry, FsIndexRebuildHandler};
pub use storage_usage_refresh::{StorageBackendFacade, StorageUsageRefreshHandler};
