// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `mounts` repository (§3 `Mount`). Backs `storage::mount::StaticMountTable`: `storagehub`
//! loads every row at startup (and after any admin mutation) and rebuilds the in-memory table,
//! converting this persisted shape (`mount_path`/`default_subfolder`) into the in-memory one
//! (`logical_prefix`).

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{DbError, DbResult};
use crate::models::Mount;

fn row_to_mount(row: &rusqlite::Row<'_>) -> rusqlite::Result<Mount> {
    Ok(Mount {
        id: row.get(0)?,
        storage_config_id: row.get(1)?,
        mount_path: row.get(2)?,
        default_subfolder: row.get(3)?,
    })
}

const SELECT_COLUMNS: &str = "id, storage_config_id, mount_path, default_subfolder";

pub fn get(conn: &Connection, id: &str) -> DbResult<Mount> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM mounts WHERE id = ?1"),
        params![id],
        row_to_mount,
    )
    .optional()?
    .ok_or_else(|| DbError::NotFound(format!("mount `{id}` not found")))
}

pub fn list(conn: &Connection) -> DbResult<Vec<Mount>> {
    let mut stmt = conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM mounts ORDER BY mount_path"))?;
    let rows = stmt.query_map([], row_to_mount)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Mounts backed by one `StorageConfig`, used by the search-index quota tier (§4.3) which is
/// keyed per-mount but reported per-config.
pub fn list_for_storage_config(conn: &Connection, storage_config_id: &str) -> DbResult<Vec<Mount>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM mounts WHERE storage_config_id = ?1 ORDER BY mount_path"
    ))?;
    let rows = stmt.query_map(params![storage_config_id], row_to_mount)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn insert(conn: &Connection, mount: &Mount) -> DbResult<()> {
    conn.execute(
        "INSERT INTO mounts (id, storage_config_id, mount_path, default_subfolder) VALUES (?1, ?2, ?3, ?4)",
        params![mount.id, mount.storage_config_id, mount.mount_path, mount.default_subfolder],
    )
    .map_err(|err| match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            DbError::Conflict(format!("mount path `{}` is already bound", mount.mount_path))
        }
        other => DbError::Sqlite(other),
    })?;
    Ok(())
}

pub fn delete(conn: &Connection, id: &str) -> DbResult<()> {
    let changed = conn.execute("DELETE FROM mounts WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("mount `{id}` not found")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::migrations::adopt_and_migrate(&conn).unwrap();
        conn.execute(
            "INSERT INTO storage_configs (id, name, storage_type, config_json, enable_disk_usage, is_default, is_public, created_at) \
             VALUES ('sc1', 'primary', 'LOCAL', '{}', 0, 1, 0, 0)",
            [],
        )
        .unwrap();
        conn
    }

    #[test]
    fn rejects_duplicate_mount_path() {
        let conn = fresh_conn();
        insert(
            &conn,
            &Mount {
                id: "m1".to_owned(),
                storage_config_id: "sc1".to_owned(),
                mount_path: "/data".to_owned(),
                default_subfolder: None,
            },
        )
        .unwrap();
        let err = insert(
            &conn,
            &Mount {
                id: "m2".to_owned(),
                storage_config_id: "sc1".to_owned(),
                mount_path: "/data".to_owned(),
                default_subfolder: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[test]
    fn list_orders_by_mount_path() {
        let conn = fresh_conn();
        insert(
            &conn,
            &Mount {
                id: "m2".to_owned(),
                storage_config_id: "sc1".to_owned(),
                mount_path: "/z".to_owned(),
                default_subfolder: None,
            },
        )
        .unwrap();
        insert(
            &conn,
            &Mount {
                id: "m1".to_owned(),
                storage_config_id: "sc1".to_owned(),
                mount_path: "/a".to_owned(),
                default_subfolder: None,
            },
        )
        .unwrap();
        let mounts = list(&conn).unwrap();
        assert_eq!(mounts.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["m1", "m2"]);
    }
}
