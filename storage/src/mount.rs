// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Mount resolution (§3 `Mount`, §4.1 Creation prelude): maps a logical VFS path onto a
//! concrete, already-contract-checked driver plus the backend-relative sub-path to act on.
//! The table of mounts itself is owned by the `db` crate; this module only defines the
//! resolution contract and a longest-prefix-match implementation usable against any in-memory
//! mount list (the `db`-backed table wraps the same algorithm around a SQL-loaded list).

use std::collections::HashMap;
use std::sync::Arc;

use crate::contract::Driver;
use crate::error::StorageError;

/// A configured mount point (§3): a logical path prefix backed by one storage configuration.
#[derive(Clone, Debug)]
pub struct Mount {
    pub id: String,
    pub logical_prefix: String,
    pub storage_config_id: String,
    pub storage_type: String,
    pub read_only: bool,
}

/// The result of resolving a logical path: which mount matched, the driver to dispatch to, and
/// the path to pass to that driver (the logical path with the mount's prefix stripped).
pub struct ResolvedMount {
    pub mount: Mount,
    pub driver: Arc<dyn Driver>,
    pub sub_path: String,
}

/// Backed by `db`'s mount table in production; this module owns only the matching algorithm.
pub trait MountResolver: Send + Sync {
    fn resolve(&self, logical_path: &str) -> Result<ResolvedMount, StorageError>;
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// A longest-prefix-match mount table held entirely in memory; used directly by tests and by
/// `storagehub` after it loads mounts out of the database at startup or on mount-table change.
#[derive(Default)]
pub struct StaticMountTable {
    mounts: Vec<(Mount, Arc<dyn Driver>)>,
}

impl StaticMountTable {
    pub fn new() -> Self {
        StaticMountTable { mounts: Vec::new() }
    }

    pub fn with_mount(mut self, mount: Mount, driver: Arc<dyn Driver>) -> Self {
        self.mounts.push((mount, driver));
        self
    }
}

impl MountResolver for StaticMountTable {
    fn resolve(&self, logical_path: &str) -> Result<ResolvedMount, StorageError> {
        if !logical_path.starts_with('/') {
            return Err(StorageError::validation("path must be absolute (start with '/')"));
        }
        let mut best: Option<&(Mount, Arc<dyn Driver>)> = None;
        for candidate in &self.mounts {
            let prefix = normalize_prefix(&candidate.0.logical_prefix);
            let matches = prefix == "/"
                || logical_path == prefix
                || logical_path.starts_with(&format!("{prefix}/"));
            if !matches {
                continue;
            }
            let is_better = match best {
                None => true,
                Some((current, _)) => normalize_prefix(&current.logical_prefix).len() < prefix.len(),
            };
            if is_better {
                best = Some(candidate);
            }
        }
        let (mount, driver) = best.ok_or_else(|| StorageError::not_found(format!("no mount covers {logical_path}")))?;
        let prefix = normalize_prefix(&mount.logical_prefix);
        let sub_path = if prefix == "/" {
            logical_path.to_owned()
        } else {
            let stripped = logical_path.strip_prefix(&prefix).unwrap_or(logical_path);
            if stripped.is_empty() {
                "/".to_owned()
            } else {
                stripped.to_owned()
            }
        };
        Ok(ResolvedMount {
            mount: mount.clone(),
            driver: Arc::clone(driver),
            sub_path,
        })
    }
}

/// Keyed lookup for the quota engine and admin endpoints: `mount_key` (`{storageConfigId}:{mountId}`,
/// §4.3) identifies a mount independent of its logical prefix.
pub fn mount_key(mount: &Mount) -> String {
    format!("{}:{}", mount.storage_config_id, mount.id)
}

pub type MountIndex = HashMap<String, Mount>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryDriver;

    #[test]
    fn resolves_longest_matching_prefix() {
        let table = StaticMountTable::new()
            .with_mount(
                Mount {
                    id: "root".to_owned(),
                    logical_prefix: "/".to_owned(),
                    storage_config_id: "cfg-root".to_owned(),
                    storage_type: "MEMORY".to_owned(),
                    read_only: false,
                },
                Arc::new(MemoryDriver::new()),
            )
            .with_mount(
                Mount {
                    id: "archive".to_owned(),
                    logical_prefix: "/archive".to_owned(),
                    storage_config_id: "cfg-archive".to_owned(),
                    storage_type: "MEMORY".to_owned(),
                    read_only: true,
                },
                Arc::new(MemoryDriver::new()),
            );

        let resolved = table.resolve("/archive/2020/report.pdf").unwrap();
        assert_eq!(resolved.mount.id, "archive");
        assert_eq!(resolved.sub_path, "/2020/report.pdf");

        let resolved = table.resolve("/inbox/file.txt").unwrap();
        assert_eq!(resolved.mount.id, "root");
        assert_eq!(resolved.sub_path, "/inbox/file.txt");
    }

    #[test]
    fn rejects_unmatched_path() {
        let table = StaticMountTable::new();
        let err = table.resolve("/nowhere").unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
