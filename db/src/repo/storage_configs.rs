// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `storage_configs` repository (§3 `StorageConfig`, §6 Driver Registry admin surface).

use rusqlite::{params, Connection, OptionalExtension};

use super::{json_column, to_json_text};
use crate::error::{DbError, DbResult};
use crate::models::StorageConfig;

fn row_to_config(row: &rusqlite::Row<'_>) -> rusqlite::Result<StorageConfig> {
    Ok(StorageConfig {
        id: row.get(0)?,
        name: row.get(1)?,
        storage_type: row.get(2)?,
        config_json: json_column(row, 3)?,
        total_storage_bytes: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        enable_disk_usage: row.get::<_, i64>(5)? != 0,
        is_default: row.get::<_, i64>(6)? != 0,
        is_public: row.get::<_, i64>(7)? != 0,
        created_at: row.get(8)?,
        last_used: row.get(9)?,
    })
}

const SELECT_COLUMNS: &str = "id, name, storage_type, config_json, total_storage_bytes, \
     enable_disk_usage, is_default, is_public, created_at, last_used";

pub fn get(conn: &Connection, id: &str) -> DbResult<StorageConfig> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM storage_configs WHERE id = ?1"),
        params![id],
        row_to_config,
    )
    .optional()?
    .ok_or_else(|| DbError::NotFound(format!("storage config `{id}` not found")))
}

pub fn list(conn: &Connection) -> DbResult<Vec<StorageConfig>> {
    let mut stmt = conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM storage_configs ORDER BY created_at"))?;
    let rows = stmt.query_map([], row_to_config)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn find_default(conn: &Connection) -> DbResult<Option<StorageConfig>> {
    Ok(conn
        .query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM storage_configs WHERE is_default = 1 LIMIT 1"),
            [],
            row_to_config,
        )
        .optional()?)
}

/// Inserts a new config. Callers must have already sealed any secret fields in `config_json`
/// (`infra::crypto::SecretBox::seal`) -- this repository layer is agnostic to the payload shape.
pub fn insert(conn: &Connection, config: &StorageConfig) -> DbResult<()> {
    if config.is_default {
        conn.execute("UPDATE storage_configs SET is_default = 0", [])?;
    }
    conn.execute(
        "INSERT INTO storage_configs \
         (id, name, storage_type, config_json, total_storage_bytes, enable_disk_usage, is_default, is_public, created_at, last_used) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            config.id,
            config.name,
            config.storage_type,
            to_json_text(&config.config_json)?,
            config.total_storage_bytes.map(|v| v as i64),
            config.enable_disk_usage as i64,
            config.is_default as i64,
            config.is_public as i64,
            config.created_at,
            config.last_used,
        ],
    )?;
    Ok(())
}

pub fn update(conn: &Connection, config: &StorageConfig) -> DbResult<()> {
    if config.is_default {
        conn.execute("UPDATE storage_configs SET is_default = 0 WHERE id != ?1", params![config.id])?;
    }
    let changed = conn.execute(
        "UPDATE storage_configs SET name = ?2, storage_type = ?3, config_json = ?4, \
         total_storage_bytes = ?5, enable_disk_usage = ?6, is_default = ?7, is_public = ?8, last_used = ?9 \
         WHERE id = ?1",
        params![
            config.id,
            config.name,
            config.storage_type,
            to_json_text(&config.config_json)?,
            config.total_storage_bytes.map(|v| v as i64),
            config.enable_disk_usage as i64,
            config.is_default as i64,
            config.is_public as i64,
            config.last_used,
        ],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("storage config `{}` not found", config.id)));
    }
    Ok(())
}

pub fn touch_last_used(conn: &Connection, id: &str, at_ms: i64) -> DbResult<()> {
    conn.execute(
        "UPDATE storage_configs SET last_used = ?2 WHERE id = ?1",
        params![id, at_ms],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: &str) -> DbResult<()> {
    let in_use: i64 = conn.query_row(
        "SELECT COUNT(*) FROM mounts WHERE storage_config_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    if in_use > 0 {
        return Err(DbError::Conflict(format!(
            "storage config `{id}` is referenced by {in_use} mount(s) and cannot be deleted"
        )));
    }
    let changed = conn.execute("DELETE FROM storage_configs WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("storage config `{id}` not found")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fresh_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::migrations::adopt_and_migrate(&conn).unwrap();
        conn
    }

    fn sample(id: &str) -> StorageConfig {
        StorageConfig {
            id: id.to_owned(),
            name: "primary".to_owned(),
            storage_type: "LOCAL".to_owned(),
            config_json: json!({"root": "/data"}),
            total_storage_bytes: Some(1_000_000),
            enable_disk_usage: true,
            is_default: true,
            is_public: false,
            created_at: 0,
            last_used: None,
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let conn = fresh_conn();
        insert(&conn, &sample("sc1")).unwrap();
        let fetched = get(&conn, "sc1").unwrap();
        assert_eq!(fetched.name, "primary");
        assert_eq!(fetched.config_json["root"], "/data");
    }

    #[test]
    fn only_one_default_at_a_time() {
        let conn = fresh_conn();
        insert(&conn, &sample("sc1")).unwrap();
        insert(&conn, &sample("sc2")).unwrap();
        let sc1 = get(&conn, "sc1").unwrap();
        assert!(!sc1.is_default);
        let sc2 = get(&conn, "sc2").unwrap();
        assert!(sc2.is_default);
    }

    #[test]
    fn delete_refuses_when_mounted() {
        let conn = fresh_conn();
        insert(&conn, &sample("sc1")).unwrap();
        conn.execute(
            "INSERT INTO mounts (id, storage_config_id, mount_path) VALUES ('m1', 'sc1', '/x')",
            [],
        )
        .unwrap();
        let err = delete(&conn, "sc1").unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }
}
