// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Binds the live mount table and storage configs to the three narrow facade traits the
//! scheduler's generic handlers depend on (`StorageBackendFacade`, `FsBackend`, `PathResolver`),
//! and to the `mount::MountResolver` the range-streaming route uses. One `Backend` owns the only
//! copy of every constructed `Driver`; `reload()` rebuilds it from `db` after an admin mutates
//! storage configs or mounts, the way the teacher's `storage_server` rebuilds its static
//! decorator tree on restart, except here it can happen without one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use db::models::StorageConfig;
use db::Db;
use infra::crypto::SecretBox;
use parking_lot::RwLock;
use scheduler::handlers::copy::{PathResolver, ResolvedPath};
use scheduler::handlers::fs_index_rebuild::{FsBackend, FsEntry};
use scheduler::handlers::storage_usage_refresh::StorageBackendFacade;
use serde_json::Value;
use storage::contract::{Driver, ProviderStats};
use storage::error::StorageError;
use storage::mount::{Mount, MountResolver, ResolvedMount, StaticMountTable};
use storage::registry::DriverRegistry;
use tokio_util::sync::CancellationToken;

/// Any `config_json` key containing `secret` is sealed at rest (mirrors
/// `DriverRegistration`'s own `with_secrets` projector heuristic in `storage::registry`) and
/// must be opened before it is handed to a driver constructor.
pub(crate) fn decrypt_secret_fields(config_json: &Value, secret_box: Option<&SecretBox>) -> Result<Value, StorageError> {
    let mut decrypted = config_json.clone();
    let Some(obj) = decrypted.as_object_mut() else {
        return Ok(decrypted);
    };
    for (key, value) in obj.iter_mut() {
        if !key.to_lowercase().contains("secret") {
            continue;
        }
        let Some(sealed) = value.as_str() else { continue };
        let Some(secret_box) = secret_box else {
            return Err(StorageError::validation(format!(
                "config field `{key}` is sealed but no secret key was configured"
            )));
        };
        let opened = secret_box.open(sealed).map_err(StorageError::validation)?;
        *value = Value::String(opened);
    }
    Ok(decrypted)
}

/// The write-path counterpart of [`decrypt_secret_fields`]: seals every `*secret*`-named field
/// of an admin-submitted `config_json` before it is persisted (§6 "secrets encrypted").
pub(crate) fn encrypt_secret_fields(config_json: &Value, secret_box: Option<&SecretBox>) -> Result<Value, StorageError> {
    let mut sealed = config_json.clone();
    let Some(obj) = sealed.as_object_mut() else {
        return Ok(sealed);
    };
    for (key, value) in obj.iter_mut() {
        if !key.to_lowercase().contains("secret") {
            continue;
        }
        let Some(plaintext) = value.as_str() else { continue };
        let Some(secret_box) = secret_box else {
            return Err(StorageError::validation(format!(
                "config field `{key}` must be sealed but no secret key was configured"
            )));
        };
        let blob = secret_box.seal(plaintext).map_err(StorageError::validation)?;
        *value = Value::String(blob);
    }
    Ok(sealed)
}

struct BackendState {
    mount_table: StaticMountTable,
    mounts_by_id: HashMap<String, (db::models::Mount, Arc<dyn Driver>)>,
    configs_by_id: HashMap<String, StorageConfig>,
    drivers_by_config: HashMap<String, Arc<dyn Driver>>,
}

async fn build_state(db: &Db, registry: &DriverRegistry, secret_box: Option<&SecretBox>) -> Result<BackendState, StorageError> {
    let (configs, mount_rows) = {
        let conn = db.lock().await;
        (db::repo::storage_configs::list(&conn)?, db::repo::mounts::list(&conn)?)
    };

    let mut drivers_by_config = HashMap::with_capacity(configs.len());
    let mut configs_by_id = HashMap::with_capacity(configs.len());
    for config in configs {
        let plaintext_config = decrypt_secret_fields(&config.config_json, secret_box)?;
        let driver = registry.create_driver(&config.storage_type, &plaintext_config).await?;
        drivers_by_config.insert(config.id.clone(), Arc::new(driver) as Arc<dyn Driver>);
        configs_by_id.insert(config.id.clone(), config);
    }

    let mut mount_table = StaticMountTable::new();
    let mut mounts_by_id = HashMap::with_capacity(mount_rows.len());
    for mount_row in mount_rows {
        let Some(config) = configs_by_id.get(&mount_row.storage_config_id) else {
            continue;
        };
        let Some(driver) = drivers_by_config.get(&mount_row.storage_config_id).cloned() else {
            continue;
        };
        let mount = Mount {
            id: mount_row.id.clone(),
            logical_prefix: mount_row.mount_path.clone(),
            storage_config_id: mount_row.storage_config_id.clone(),
            storage_type: config.storage_type.clone(),
            read_only: false,
        };
        mount_table = mount_table.with_mount(mount, driver.clone());
        mounts_by_id.insert(mount_row.id.clone(), (mount_row, driver));
    }

    Ok(BackendState {
        mount_table,
        mounts_by_id,
        configs_by_id,
        drivers_by_config,
    })
}

pub struct Backend {
    db: Arc<Db>,
    registry: Arc<DriverRegistry>,
    secret_box: Option<Arc<SecretBox>>,
    state: RwLock<BackendState>,
}

impl Backend {
    pub async fn build(db: Arc<Db>, registry: Arc<DriverRegistry>, secret_box: Option<Arc<SecretBox>>) -> Result<Self, StorageError> {
        let state = build_state(&db, &registry, secret_box.as_deref()).await?;
        Ok(Backend {
            db,
            registry,
            secret_box,
            state: RwLock::new(state),
        })
    }

    /// Rebuilds the mount table and driver set from `db`; called after an admin endpoint
    /// creates, updates, or deletes a `StorageConfig`/`Mount`.
    pub async fn reload(&self) -> Result<(), StorageError> {
        let state = build_state(&self.db, &self.registry, self.secret_box.as_deref()).await?;
        *self.state.write() = state;
        Ok(())
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    pub fn storage_configs(&self) -> Vec<StorageConfig> {
        self.state.read().configs_by_id.values().cloned().collect()
    }
}

impl MountResolver for Backend {
    fn resolve(&self, logical_path: &str) -> Result<ResolvedMount, StorageError> {
        self.state.read().mount_table.resolve(logical_path)
    }
}

#[async_trait]
impl PathResolver for Backend {
    async fn resolve(&self, logical_path: &str) -> Result<ResolvedPath, StorageError> {
        let resolved = MountResolver::resolve(self, logical_path)?;
        Ok(ResolvedPath {
            driver: resolved.driver,
            storage_type: resolved.mount.storage_type,
            storage_config_id: resolved.mount.storage_config_id,
            sub_path: resolved.sub_path,
        })
    }

    /// §4.3 admission guard: reads the cached usage snapshot written by `storage_usage_refresh`
    /// rather than computing one inline -- an upload must never stall on a scan or upstream quota
    /// probe. Absent a snapshot or a configured limit, every request is allowed (§4.3 step 2,
    /// testable property 8).
    async fn check_admission(&self, storage_config_id: &str, incoming_bytes: u64) -> Result<(), StorageError> {
        let total_storage_bytes = {
            let state = self.state.read();
            match state.configs_by_id.get(storage_config_id) {
                Some(config) => config.total_storage_bytes,
                None => return Ok(()),
            }
        };
        let Some(total_storage_bytes) = total_storage_bytes else {
            return Ok(());
        };
        let conn = self.db.lock().await;
        let snapshot = db::repo::metrics::get(&conn, "storage_config", storage_config_id, "computed_usage")?;
        let used_bytes = snapshot.and_then(|s| s.value_num).map(|v| v as u64);
        let usage = storage::quota::UsageSnapshot {
            total_bytes: None,
            used_bytes,
            source: storage::quota::UsageSource::Unknown,
            stale: false,
        };
        storage::quota::admission_check(&usage, Some(total_storage_bytes), incoming_bytes, 0)
    }
}

#[async_trait]
impl FsBackend for Backend {
    async fn list_recursive(&self, mount_id: &str) -> Result<Vec<FsEntry>, StorageError> {
        let (mount_row, driver) = {
            let state = self.state.read();
            let Some((mount_row, driver)) = state.mounts_by_id.get(mount_id) else {
                return Err(StorageError::not_found(format!("no such mount `{mount_id}`")));
            };
            (mount_row.clone(), driver.clone())
        };

        let root = mount_row.default_subfolder.clone().unwrap_or_else(|| "/".to_owned());
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(path) = stack.pop() {
            let listing = driver.list_directory(&path).await?;
            for item in listing.items {
                if item.is_directory {
                    stack.push(item.path.clone());
                }
                out.push(FsEntry {
                    path: item.path,
                    is_dir: item.is_directory,
                    size: item.size,
                });
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl StorageBackendFacade for Backend {
    fn local_root(&self, storage_config_id: &str) -> Option<PathBuf> {
        let state = self.state.read();
        let config = state.configs_by_id.get(storage_config_id)?;
        if config.storage_type != "LOCAL" {
            return None;
        }
        config.config_json.get("root_path")?.as_str().map(PathBuf::from)
    }

    async fn provider_stats(&self, storage_config_id: &str, cancel: CancellationToken) -> Option<ProviderStats> {
        let driver = {
            let state = self.state.read();
            state.drivers_by_config.get(storage_config_id).cloned()
        }?;
        driver.get_stats(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::Mount as MountRow;
    use serde_json::json;

    async fn seeded_db() -> Arc<Db> {
        let db = Arc::new(Db::open_in_memory().unwrap());
        db.migrate().await.unwrap();
        {
            let conn = db.lock().await;
            db::repo::storage_configs::insert(
                &conn,
                &StorageConfig {
                    id: "sc1".to_owned(),
                    name: "primary".to_owned(),
                    storage_type: "MEMORY".to_owned(),
                    config_json: json!({}),
                    total_storage_bytes: None,
                    enable_disk_usage: false,
                    is_default: true,
                    is_public: false,
                    created_at: 0,
                    last_used: None,
                },
            )
            .unwrap();
            db::repo::mounts::insert(
                &conn,
                &MountRow {
                    id: "m1".to_owned(),
                    storage_config_id: "sc1".to_owned(),
                    mount_path: "/".to_owned(),
                    default_subfolder: None,
                },
            )
            .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn resolves_through_the_built_mount_table() {
        let db = seeded_db().await;
        let registry = Arc::new(crate::driver_registrations::build_registry());
        let backend = Backend::build(db, registry, None).await.unwrap();

        let resolved = MountResolver::resolve(&backend, "/hello.txt").unwrap();
        assert_eq!(resolved.mount.storage_config_id, "sc1");
        assert_eq!(resolved.sub_path, "/hello.txt");
    }

    #[tokio::test]
    async fn reload_picks_up_newly_added_mounts() {
        let db = seeded_db().await;
        let registry = Arc::new(crate::driver_registrations::build_registry());
        let backend = Backend::build(db.clone(), registry, None).await.unwrap();

        {
            let conn = db.lock().await;
            db::repo::storage_configs::insert(
                &conn,
                &StorageConfig {
                    id: "sc2".to_owned(),
                    name: "archive".to_owned(),
                    storage_type: "MEMORY".to_owned(),
                    config_json: json!({}),
                    total_storage_bytes: None,
                    enable_disk_usage: false,
                    is_default: false,
                    is_public: false,
                    created_at: 0,
                    last_used: None,
                },
            )
            .unwrap();
            db::repo::mounts::insert(
                &conn,
                &MountRow {
                    id: "m2".to_owned(),
                    storage_config_id: "sc2".to_owned(),
                    mount_path: "/archive".to_owned(),
                    default_subfolder: None,
                },
            )
            .unwrap();
        }

        backend.reload().await.unwrap();
        let resolved = MountResolver::resolve(&backend, "/archive/x").unwrap();
        assert_eq!(resolved.mount.storage_config_id, "sc2");
    }
}
