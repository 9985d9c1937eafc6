// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `vfs_nodes` repository (§3 `VfsNode`): the logical inventory fallback tier for quota
//! computation (§4.3 `vfs-inventory`), one level more authoritative than the search index but
//! slower than a provider/local-du probe.

use rusqlite::{params, Connection};

use crate::error::DbResult;
use crate::models::{VfsNode, VfsNodeStatus, VfsNodeType};

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<VfsNode> {
    let node_type_str: String = row.get(2)?;
    let node_type = VfsNodeType::parse(&node_type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown vfs node type `{node_type_str}`").into(),
        )
    })?;
    let status_str: String = row.get(5)?;
    let status = VfsNodeStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown vfs node status `{status_str}`").into(),
        )
    })?;
    Ok(VfsNode {
        scope_type: row.get(0)?,
        scope_id: row.get(1)?,
        node_type,
        path: row.get(3)?,
        size: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        status,
    })
}

const SELECT_COLUMNS: &str = "scope_type, scope_id, node_type, path, size, status";

pub fn upsert(conn: &Connection, node: &VfsNode) -> DbResult<()> {
    conn.execute(
        "INSERT INTO vfs_nodes (scope_type, scope_id, node_type, path, size, status) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT (scope_type, scope_id, path) DO UPDATE SET \
         node_type = excluded.node_type, size = excluded.size, status = excluded.status",
        params![
            node.scope_type,
            node.scope_id,
            node.node_type.as_str(),
            node.path,
            node.size.map(|v| v as i64),
            node.status.as_str(),
        ],
    )?;
    Ok(())
}

pub fn mark_deleted(conn: &Connection, scope_type: &str, scope_id: &str, path: &str) -> DbResult<()> {
    conn.execute(
        "UPDATE vfs_nodes SET status = ?4 WHERE scope_type = ?1 AND scope_id = ?2 AND path = ?3",
        params![scope_type, scope_id, path, VfsNodeStatus::Deleted.as_str()],
    )?;
    Ok(())
}

/// Total size across active (non-deleted) file nodes in this scope, the value the `vfs-inventory`
/// quota tier reports (§4.3).
pub fn total_active_bytes(conn: &Connection, scope_type: &str, scope_id: &str) -> DbResult<Option<u64>> {
    let total: Option<i64> = conn.query_row(
        "SELECT SUM(size) FROM vfs_nodes WHERE scope_type = ?1 AND scope_id = ?2 \
         AND node_type = 'file' AND status = 'active'",
        params![scope_type, scope_id],
        |row| row.get(0),
    )?;
    Ok(total.map(|v| v as u64))
}

pub fn list_active(conn: &Connection, scope_type: &str, scope_id: &str) -> DbResult<Vec<VfsNode>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM vfs_nodes WHERE scope_type = ?1 AND scope_id = ?2 AND status = 'active'"
    ))?;
    let rows = stmt.query_map(params![scope_type, scope_id], row_to_node)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::migrations::adopt_and_migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn total_active_bytes_ignores_deleted_nodes() {
        let conn = fresh_conn();
        upsert(
            &conn,
            &VfsNode {
                scope_type: "mount".to_owned(),
                scope_id: "m1".to_owned(),
                node_type: VfsNodeType::File,
                path: "/a".to_owned(),
                size: Some(100),
                status: VfsNodeStatus::Active,
            },
        )
        .unwrap();
        upsert(
            &conn,
            &VfsNode {
                scope_type: "mount".to_owned(),
                scope_id: "m1".to_owned(),
                node_type: VfsNodeType::File,
                path: "/b".to_owned(),
                size: Some(250),
                status: VfsNodeStatus::Active,
            },
        )
        .unwrap();
        mark_deleted(&conn, "mount", "m1", "/b").unwrap();
        assert_eq!(total_active_bytes(&conn, "mount", "m1").unwrap(), Some(100));
    }

    #[test]
    fn upsert_is_idempotent_per_path() {
        let conn = fresh_conn();
        let node = VfsNode {
            scope_type: "mount".to_owned(),
            scope_id: "m1".to_owned(),
            node_type: VfsNodeType::File,
            path: "/a".to_owned(),
            size: Some(100),
            status: VfsNodeStatus::Active,
        };
        upsert(&conn, &node).unwrap();
        let mut resized = node;
        resized.size = Some(500);
        upsert(&conn, &resized).unwrap();
        assert_eq!(total_active_bytes(&conn, "mount", "m1").unwrap(), Some(500));
    }
}
