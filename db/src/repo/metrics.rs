// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `metrics_cache` repository (§3 `MetricsSnapshot`): the on-disk side of the quota engine's
//! cache-only fallback (§4.3), consulted when an in-process `TtlCache` entry has expired and a
//! fresh probe is disallowed (e.g. a `cache_only` admin-UI read).

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::DbResult;
use crate::models::MetricsSnapshot;

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricsSnapshot> {
    Ok(MetricsSnapshot {
        scope_type: row.get(0)?,
        scope_id: row.get(1)?,
        metric_key: row.get(2)?,
        value_num: row.get(3)?,
        value_text: row.get(4)?,
        value_json_text: row.get(5)?,
        snapshot_at_ms: row.get(6)?,
        updated_at_ms: row.get(7)?,
        error_message: row.get(8)?,
    })
}

const SELECT_COLUMNS: &str = "scope_type, scope_id, metric_key, value_num, value_text, \
     value_json_text, snapshot_at_ms, updated_at_ms, error_message";

pub fn get(conn: &Connection, scope_type: &str, scope_id: &str, metric_key: &str) -> DbResult<Option<MetricsSnapshot>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM metrics_cache \
                 WHERE scope_type = ?1 AND scope_id = ?2 AND metric_key = ?3"
            ),
            params![scope_type, scope_id, metric_key],
            row_to_snapshot,
        )
        .optional()?)
}

pub fn upsert(conn: &Connection, snapshot: &MetricsSnapshot) -> DbResult<()> {
    conn.execute(
        "INSERT INTO metrics_cache \
         (scope_type, scope_id, metric_key, value_num, value_text, value_json_text, snapshot_at_ms, updated_at_ms, error_message) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
         ON CONFLICT (scope_type, scope_id, metric_key) DO UPDATE SET \
         value_num = excluded.value_num, value_text = excluded.value_text, \
         value_json_text = excluded.value_json_text, snapshot_at_ms = excluded.snapshot_at_ms, \
         updated_at_ms = excluded.updated_at_ms, error_message = excluded.error_message",
        params![
            snapshot.scope_type,
            snapshot.scope_id,
            snapshot.metric_key,
            snapshot.value_num,
            snapshot.value_text,
            snapshot.value_json_text,
            snapshot.snapshot_at_ms,
            snapshot.updated_at_ms,
            snapshot.error_message,
        ],
    )?;
    Ok(())
}

pub fn list_for_scope(conn: &Connection, scope_type: &str, scope_id: &str) -> DbResult<Vec<MetricsSnapshot>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM metrics_cache WHERE scope_type = ?1 AND scope_id = ?2"
    ))?;
    let rows = stmt.query_map(params![scope_type, scope_id], row_to_snapshot)?;
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

    fn sample() -> MetricsSnapshot {
        MetricsSnapshot {
            scope_type: "storage_config".to_owned(),
            scope_id: "sc1".to_owned(),
            metric_key: "computed_usage".to_owned(),
            value_num: Some(1024.0),
            value_text: Some("LOCAL_DU".to_owned()),
            value_json_text: None,
            snapshot_at_ms: 100,
            updated_at_ms: 100,
            error_message: None,
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let conn = fresh_conn();
        upsert(&conn, &sample()).unwrap();
        let fetched = get(&conn, "storage_config", "sc1", "computed_usage").unwrap().unwrap();
        assert_eq!(fetched.value_num, Some(1024.0));
    }

    #[test]
    fn upsert_overwrites_existing_snapshot() {
        let conn = fresh_conn();
        upsert(&conn, &sample()).unwrap();
        let mut updated = sample();
        updated.value_num = Some(2048.0);
        updated.updated_at_ms = 200;
        upsert(&conn, &updated).unwrap();
        let fetched = get(&conn, "storage_config", "sc1", "computed_usage").unwrap().unwrap();
        assert_eq!(fetched.value_num, Some(2048.0));
        assert_eq!(fetched.updated_at_ms, 200);
    }

    #[test]
    fn missing_snapshot_returns_none() {
        let conn = fresh_conn();
        assert!(get(&conn, "storage_config", "nope", "computed_usage").unwrap().is_none());
    }
}
