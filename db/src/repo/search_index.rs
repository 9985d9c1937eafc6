// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `fs_search_index_entries` repository (§3 `SearchIndexEntry`): the least-authoritative, lowest
//! priority quota tier (§4.3 `search-index`) and the target table `fs_index_rebuild` /
//! `fs_index_apply_dirty` (§4.6) write into.

use rusqlite::{params, Connection};

use crate::error::DbResult;
use crate::models::{IndexEntryStatus, SearchIndexEntry};

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<SearchIndexEntry> {
    let status_str: String = row.get(3)?;
    let status = IndexEntryStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown search index status `{status_str}`").into(),
        )
    })?;
    Ok(SearchIndexEntry {
        mount_id: row.get(0)?,
        path: row.get(1)?,
        is_dir: row.get::<_, i64>(2)? != 0,
        size: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        status,
    })
}

const SELECT_COLUMNS: &str = "mount_id, path, is_dir, status, size";

pub fn upsert(conn: &Connection, entry: &SearchIndexEntry) -> DbResult<()> {
    conn.execute(
        "INSERT INTO fs_search_index_entries (mount_id, path, is_dir, size, status) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT (mount_id, path) DO UPDATE SET \
         is_dir = excluded.is_dir, size = excluded.size, status = excluded.status",
        params![entry.mount_id, entry.path, entry.is_dir as i64, entry.size.map(|v| v as i64), entry.status.as_str()],
    )?;
    Ok(())
}

pub fn remove(conn: &Connection, mount_id: &str, path: &str) -> DbResult<()> {
    conn.execute(
        "DELETE FROM fs_search_index_entries WHERE mount_id = ?1 AND path = ?2",
        params![mount_id, path],
    )?;
    Ok(())
}

/// Drops every entry for `mount_id` before a full rebuild (`fs_index_rebuild`, §4.6).
pub fn clear_mount(conn: &Connection, mount_id: &str) -> DbResult<()> {
    conn.execute("DELETE FROM fs_search_index_entries WHERE mount_id = ?1", params![mount_id])?;
    Ok(())
}

pub fn total_bytes(conn: &Connection, mount_id: &str) -> DbResult<Option<u64>> {
    let total: Option<i64> = conn.query_row(
        "SELECT SUM(size) FROM fs_search_index_entries WHERE mount_id = ?1 AND is_dir = 0 AND status = 'ready'",
        params![mount_id],
        |row| row.get(0),
    )?;
    Ok(total.map(|v| v as u64))
}

pub fn list_for_mount(conn: &Connection, mount_id: &str) -> DbResult<Vec<SearchIndexEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM fs_search_index_entries WHERE mount_id = ?1 ORDER BY path"
    ))?;
    let rows = stmt.query_map(params![mount_id], row_to_entry)?;
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

    fn file(mount_id: &str, path: &str, size: u64) -> SearchIndexEntry {
        SearchIndexEntry {
            mount_id: mount_id.to_owned(),
            path: path.to_owned(),
            is_dir: false,
            size: Some(size),
            status: IndexEntryStatus::Ready,
        }
    }

    #[test]
    fn clear_mount_only_affects_that_mount() {
        let conn = fresh_conn();
        upsert(&conn, &file("m1", "/a", 10)).unwrap();
        upsert(&conn, &file("m2", "/b", 20)).unwrap();
        clear_mount(&conn, "m1").unwrap();
        assert_eq!(total_bytes(&conn, "m1").unwrap(), None);
        assert_eq!(total_bytes(&conn, "m2").unwrap(), Some(20));
    }

    #[test]
    fn total_bytes_excludes_directories() {
        let conn = fresh_conn();
        upsert(&conn, &file("m1", "/a", 10)).unwrap();
        upsert(
            &conn,
            &SearchIndexEntry {
                mount_id: "m1".to_owned(),
                path: "/dir".to_owned(),
                is_dir: true,
                size: Some(999),
                status: IndexEntryStatus::Ready,
            },
        )
        .unwrap();
        assert_eq!(total_bytes(&conn, "m1").unwrap(), Some(10));
    }
}
