// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `fs_dirty_queue` repository (§3 `DirtyQueue`): a FIFO of filesystem-change events awaiting
//! search-index reconciliation (§5 Ordering, the `fs_index_apply_dirty` handler in §4.6).

use rusqlite::{params, Connection};

use crate::error::DbResult;
use crate::models::{DirtyOp, DirtyQueueEntry};

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<DirtyQueueEntry> {
    let op_str: String = row.get(3)?;
    let op = DirtyOp::parse(&op_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown dirty queue op `{op_str}`").into(),
        )
    })?;
    Ok(DirtyQueueEntry {
        id: row.get(0)?,
        mount_id: row.get(1)?,
        path: row.get(2)?,
        op,
        enqueued_at: row.get(4)?,
    })
}

const SELECT_COLUMNS: &str = "id, mount_id, path, op, enqueued_at";

pub fn enqueue(conn: &Connection, mount_id: &str, path: &str, op: DirtyOp, enqueued_at: i64) -> DbResult<()> {
    conn.execute(
        "INSERT INTO fs_dirty_queue (mount_id, path, op, enqueued_at) VALUES (?1, ?2, ?3, ?4)",
        params![mount_id, path, op.as_str(), enqueued_at],
    )?;
    Ok(())
}

/// Oldest `limit` entries for `mount_id`, in enqueue order (§5 Ordering: FIFO per mount).
pub fn take_batch(conn: &Connection, mount_id: &str, limit: i64) -> DbResult<Vec<DirtyQueueEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM fs_dirty_queue WHERE mount_id = ?1 ORDER BY id LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![mount_id, limit], row_to_entry)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn delete_batch(conn: &Connection, ids: &[i64]) -> DbResult<()> {
    for id in ids {
        conn.execute("DELETE FROM fs_dirty_queue WHERE id = ?1", params![id])?;
    }
    Ok(())
}

pub fn depth(conn: &Connection, mount_id: &str) -> DbResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM fs_dirty_queue WHERE mount_id = ?1",
        params![mount_id],
        |row| row.get(0),
    )?)
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
    fn take_batch_preserves_fifo_order() {
        let conn = fresh_conn();
        enqueue(&conn, "m1", "/a", DirtyOp::Upsert, 1).unwrap();
        enqueue(&conn, "m1", "/b", DirtyOp::Delete, 2).unwrap();
        enqueue(&conn, "m1", "/c", DirtyOp::Upsert, 3).unwrap();
        let batch = take_batch(&conn, "m1", 2).unwrap();
        assert_eq!(batch.iter().map(|e| e.path.as_str()).collect::<Vec<_>>(), vec!["/a", "/b"]);
    }

    #[test]
    fn delete_batch_removes_processed_entries() {
        let conn = fresh_conn();
        enqueue(&conn, "m1", "/a", DirtyOp::Upsert, 1).unwrap();
        enqueue(&conn, "m1", "/b", DirtyOp::Upsert, 2).unwrap();
        let batch = take_batch(&conn, "m1", 10).unwrap();
        delete_batch(&conn, &batch.iter().map(|e| e.id).collect::<Vec<_>>()).unwrap();
        assert_eq!(depth(&conn, "m1").unwrap(), 0);
    }
}
