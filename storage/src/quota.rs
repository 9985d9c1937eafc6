// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Quota & Usage Engine (§4.3, component C): tiered usage computation with an admission guard
//! for incoming writes. The engine is deliberately decoupled from any concrete storage backend:
//! it drives a small set of caller-supplied probes (`UsageProbes`) rather than calling into
//! drivers directly, the way the teacher's quota-adjacent code threads a narrow trait through
//! its metering decorator instead of depending on a concrete backend.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::contract::ProviderStats;
use crate::error::StorageError;
use crate::ttl_cache::TtlCache;

const LOCAL_DU_TIMEOUT: Duration = Duration::from_secs(10);
const LOCAL_DU_ENTRY_CAP: usize = 500_000;
const LOCAL_DU_CACHE_TTL: Duration = Duration::from_secs(60);
const PROVIDER_QUOTA_TIMEOUT: Duration = Duration::from_secs(6);
const PROVIDER_QUOTA_CACHE_TTL: Duration = Duration::from_secs(60);

/// Which tier ultimately produced a [`UsageSnapshot`] (§4.3 fallthrough table).
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageSource {
    ProviderQuota,
    LocalDu,
    VfsInventory,
    SearchIndex,
    Unknown,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct UsageSnapshot {
    pub total_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
    pub source: UsageSource,
    pub stale: bool,
}

impl UsageSnapshot {
    fn unknown() -> Self {
        UsageSnapshot {
            total_bytes: None,
            used_bytes: None,
            source: UsageSource::Unknown,
            stale: false,
        }
    }
}

/// Slow fallback tiers a quota computation may need (§4.3): the VFS row inventory and the search
/// index, both backed by the `db` crate's tables. Kept as a trait here so `storage` has no
/// compile-time dependency on `db`.
#[async_trait]
pub trait UsageProbes: Send + Sync {
    async fn vfs_inventory_bytes(&self, mount_key: &str) -> Option<u64>;
    async fn search_index_bytes(&self, mount_key: &str) -> Option<u64>;
}

pub struct QuotaEngine {
    local_du_cache: TtlCache<String, u64>,
    provider_cache: TtlCache<String, ProviderStats>,
}

impl Default for QuotaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl QuotaEngine {
    pub fn new() -> Self {
        QuotaEngine {
            local_du_cache: TtlCache::new(LOCAL_DU_CACHE_TTL),
            provider_cache: TtlCache::new(PROVIDER_QUOTA_CACHE_TTL),
        }
    }

    /// §4.3: for `LOCAL` mounts, walk the filesystem (bounded) before falling through to the
    /// VFS inventory and search index. For all other storage types, ask the driver's provider
    /// quota first.
    pub async fn compute_usage(
        &self,
        mount_key: &str,
        storage_type: &str,
        local_root: Option<&Path>,
        stats_probe: Option<&(dyn Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = Option<ProviderStats>> + Send>> + Send + Sync)>,
        probes: &dyn UsageProbes,
        cache_only: bool,
    ) -> UsageSnapshot {
        if storage_type == "LOCAL" {
            if let Some(root) = local_root {
                if let Some(snapshot) = self.local_du_tier(mount_key, root, cache_only).await {
                    return snapshot;
                }
            }
        } else if let Some(probe) = stats_probe {
            if let Some(snapshot) = self.provider_quota_tier(mount_key, probe, cache_only).await {
                return snapshot;
            }
        }

        if let Some(used) = probes.vfs_inventory_bytes(mount_key).await {
            return UsageSnapshot {
                total_bytes: None,
                used_bytes: Some(used),
                source: UsageSource::VfsInventory,
                stale: false,
            };
        }
        if let Some(used) = probes.search_index_bytes(mount_key).await {
            return UsageSnapshot {
                total_bytes: None,
                used_bytes: Some(used),
                source: UsageSource::SearchIndex,
                stale: false,
            };
        }
        UsageSnapshot::unknown()
    }

    async fn local_du_tier(&self, mount_key: &str, root: &Path, cache_only: bool) -> Option<UsageSnapshot> {
        if cache_only {
            return self.local_du_cache.peek(&mount_key.to_owned()).map(|used| UsageSnapshot {
                total_bytes: None,
                used_bytes: Some(used),
                source: UsageSource::LocalDu,
                stale: false,
            });
        }
        let root = root.to_path_buf();
        let result: Result<u64, ()> = self
            .local_du_cache
            .get_or_refresh(mount_key.to_owned(), || async move {
                tokio::time::timeout(LOCAL_DU_TIMEOUT, bounded_du(&root, LOCAL_DU_ENTRY_CAP))
                    .await
                    .map_err(|_| ())
            })
            .await;
        match result {
            Ok(used) => Some(UsageSnapshot {
                total_bytes: None,
                used_bytes: Some(used),
                source: UsageSource::LocalDu,
                stale: false,
            }),
            Err(()) => self.local_du_cache.peek_stale(&mount_key.to_owned()).map(|used| UsageSnapshot {
                total_bytes: None,
                used_bytes: Some(used),
                source: UsageSource::LocalDu,
                stale: true,
            }),
        }
    }

    async fn provider_quota_tier(
        &self,
        mount_key: &str,
        probe: &(dyn Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = Option<ProviderStats>> + Send>> + Send + Sync),
        cache_only: bool,
    ) -> Option<UsageSnapshot> {
        if cache_only {
            return self
                .provider_cache
                .peek(&mount_key.to_owned())
                .map(|stats| provider_stats_to_snapshot(stats, false));
        }
        let result: Result<ProviderStats, ()> = self
            .provider_cache
            .get_or_refresh(mount_key.to_owned(), || async move {
                tokio::time::timeout(PROVIDER_QUOTA_TIMEOUT, probe())
                    .await
                    .ok()
                    .flatten()
                    .ok_or(())
            })
            .await;
        match result {
            Ok(stats) => Some(provider_stats_to_snapshot(stats, false)),
            Err(()) => self
                .provider_cache
                .peek_stale(&mount_key.to_owned())
                .map(|stats| provider_stats_to_snapshot(stats, true)),
        }
    }
}

fn provider_stats_to_snapshot(stats: ProviderStats, stale: bool) -> UsageSnapshot {
    UsageSnapshot {
        total_bytes: stats.total_bytes,
        used_bytes: stats.used_bytes,
        source: UsageSource::ProviderQuota,
        stale,
    }
}

/// Depth-first byte count, stopping early once `entry_cap` directory entries have been visited
/// (§4.3: local-du is a best-effort estimate, not an exact accounting, beyond the cap).
async fn bounded_du(root: &Path, entry_cap: usize) -> u64 {
    let mut total: u64 = 0;
    let mut visited: usize = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if visited >= entry_cap {
                return total;
            }
            visited += 1;
            let Ok(file_type) = entry.file_type().await else { continue };
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if let Ok(metadata) = entry.metadata().await {
                total += metadata.len();
            }
        }
    }
    total
}

/// §4.3 admission guard: rejects an incoming write that would push usage over
/// `total_storage_bytes`, crediting the bytes the write replaces (`old_bytes`, e.g. an overwrite
/// of an existing object) so in-place updates aren't double-counted.
pub fn admission_check(
    snapshot: &UsageSnapshot,
    total_storage_bytes: Option<u64>,
    incoming_bytes: u64,
    old_bytes: u64,
) -> Result<(), StorageError> {
    let Some(total) = total_storage_bytes else {
        return Ok(());
    };
    let Some(used) = snapshot.used_bytes else {
        return Ok(());
    };
    let effective_incoming = incoming_bytes.saturating_sub(old_bytes);
    if used.saturating_add(effective_incoming) > total {
        let remaining_mb = total.saturating_sub(used) as f64 / (1024.0 * 1024.0);
        let needed_mb = effective_incoming as f64 / (1024.0 * 1024.0);
        return Err(StorageError::validation(format!(
            "storage full: remaining {remaining_mb:.1} MB, needs {needed_mb:.1} MB"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoProbes;

    #[async_trait]
    impl UsageProbes for NoProbes {
        async fn vfs_inventory_bytes(&self, _mount_key: &str) -> Option<u64> {
            None
        }
        async fn search_index_bytes(&self, _mount_key: &str) -> Option<u64> {
            None
        }
    }

    struct FixedProbes(u64);

    #[async_trait]
    impl UsageProbes for FixedProbes {
        async fn vfs_inventory_bytes(&self, _mount_key: &str) -> Option<u64> {
            Some(self.0)
        }
        async fn search_index_bytes(&self, _mount_key: &str) -> Option<u64> {
            None
        }
    }

    #[tokio::test]
    async fn local_du_walks_a_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.bin"), vec![0u8; 100]).await.unwrap();
        tokio::fs::write(dir.path().join("b.bin"), vec![0u8; 250]).await.unwrap();
        let engine = QuotaEngine::new();
        let snapshot = engine
            .compute_usage("m1", "LOCAL", Some(dir.path()), None, &NoProbes, false)
            .await;
        assert_eq!(snapshot.source, UsageSource::LocalDu);
        assert_eq!(snapshot.used_bytes, Some(350));
    }

    #[tokio::test]
    async fn falls_through_to_vfs_inventory_when_no_local_root() {
        let engine = QuotaEngine::new();
        let snapshot = engine
            .compute_usage("m1", "S3", None, None, &FixedProbes(9_000), false)
            .await;
        assert_eq!(snapshot.source, UsageSource::VfsInventory);
        assert_eq!(snapshot.used_bytes, Some(9_000));
    }

    #[test]
    fn admission_rejects_over_quota_write() {
        let snapshot = UsageSnapshot {
            total_bytes: None,
            used_bytes: Some(900),
            source: UsageSource::LocalDu,
            stale: false,
        };
        let err = admission_check(&snapshot, Some(1000), 200, 0).unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[test]
    fn admission_credits_old_bytes_on_overwrite() {
        let snapshot = UsageSnapshot {
            total_bytes: None,
            used_bytes: Some(900),
            source: UsageSource::LocalDu,
            stale: false,
        };
        // Overwriting a 150-byte object with a 200-byte one: effective incoming is only 50.
        assert!(admission_check(&snapshot, Some(1000), 200, 150).is_ok());
    }
}
