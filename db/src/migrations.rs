// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Schema Adopt (§4.5): deciding what to do with whatever database file this binary was pointed
//! at, which may be a brand-new file, one this binary already owns, or one carrying an older
//! deployment's tables and rows. The decision matrix turns on two observations (does the
//! required table set exist, and is there business data in it) plus one piece of legacy state
//! (a `schema_version` row left behind by a predecessor), and the outcome is always one of:
//! initialize fresh, squash-mark as already-migrated, or refuse and surface the conflict to an
//! operator rather than silently doing something destructive.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{DbError, DbResult};
use crate::schema::{self, BUSINESS_TABLES, CURRENT_SCHEMA_VERSION, REQUIRED_TABLES};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdoptionOutcome {
    /// No required tables existed; the fixed DDL was created fresh and the chain was
    /// squash-marked v01..vCURRENT.
    Initialized,
    /// Required tables already existed (with or without business rows, possibly carrying a
    /// legacy `schema_version`); squash-marked up through whatever version was already reached.
    Adopted { marked_through: u32 },
}

/// Runs the §4.5 decision matrix against `conn` and leaves the database in the final schema,
/// or returns `DbError::SchemaAdoption` if adoption must be refused.
pub fn adopt_and_migrate(conn: &Connection) -> DbResult<AdoptionOutcome> {
    let has_required_tables = REQUIRED_TABLES.iter().all(|table| table_exists(conn, table));
    let any_required_table_exists = REQUIRED_TABLES.iter().any(|table| table_exists(conn, table));

    if !any_required_table_exists {
        create_all_tables(conn)?;
        squash_mark(conn, 1, CURRENT_SCHEMA_VERSION)?;
        return Ok(AdoptionOutcome::Initialized);
    }

    // Some but not all required tables exist: a half-created database from an interrupted prior
    // run. Bring the rest up by re-running the (idempotent, `IF NOT EXISTS`) DDL rather than
    // refusing -- there are no business rows to protect if the schema itself isn't complete.
    if !has_required_tables {
        create_all_tables(conn)?;
    }

    let has_business_rows = BUSINESS_TABLES
        .iter()
        .any(|table| table_has_rows(conn, table));

    if !has_business_rows {
        create_all_tables(conn)?;
        squash_mark(conn, 1, CURRENT_SCHEMA_VERSION)?;
        remove_legacy_settings(conn)?;
        return Ok(AdoptionOutcome::Adopted {
            marked_through: CURRENT_SCHEMA_VERSION,
        });
    }

    let legacy_version = legacy_schema_version(conn)?;
    match legacy_version {
        Some(v) if v > 0 => {
            let marked_through = v.min(CURRENT_SCHEMA_VERSION);
            create_all_tables(conn)?;
            squash_mark(conn, 1, marked_through)?;
            remove_legacy_settings(conn)?;
            Ok(AdoptionOutcome::Adopted { marked_through })
        }
        _ => Err(DbError::SchemaAdoption(
            "database has required tables and business rows but no legacy schema_version marker; \
             refusing to adopt automatically -- run the migration tool with an explicit \
             --force-adopt flag after reviewing the existing schema"
                .to_string(),
        )),
    }
}

fn create_all_tables(conn: &Connection) -> DbResult<()> {
    for statement in schema::ALL_TABLES {
        conn.execute_batch(statement)?;
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |_| Ok(()),
    )
    .optional()
    .unwrap_or(None)
    .is_some()
}

fn table_has_rows(conn: &Connection, table: &str) -> bool {
    if !table_exists(conn, table) {
        return false;
    }
    let query = format!("SELECT 1 FROM {table} LIMIT 1");
    conn.query_row(&query, [], |_| Ok(()))
        .optional()
        .unwrap_or(None)
        .is_some()
}

/// A predecessor's `schema_version` marker, read from `system_settings` if that table and key
/// happen to exist (the only legacy shape this decision matrix recognizes, per §4.5).
fn legacy_schema_version(conn: &Connection) -> DbResult<Option<u32>> {
    if !table_exists(conn, "system_settings") {
        return Ok(None);
    }
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM system_settings WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse::<u32>().ok()))
}

/// §4.5: "on successful adopt, the legacy keys are removed from `system_settings`." Idempotent
/// no-op if the table doesn't exist (fresh-init path) or the key was never set.
fn remove_legacy_settings(conn: &Connection) -> DbResult<()> {
    if !table_exists(conn, "system_settings") {
        return Ok(());
    }
    conn.execute(
        "DELETE FROM system_settings WHERE key = 'schema_version'",
        [],
    )?;
    Ok(())
}

fn squash_mark(conn: &Connection, from: u32, through: u32) -> DbResult<()> {
    let now = crate::now_ms();
    for version in from..=through {
        let id = format!("v{version:02}");
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations (id, applied_at) VALUES (?1, ?2)",
            rusqlite::params![id, now],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn fresh_database_initializes_and_marks_full_chain() {
        let conn = open();
        let outcome = adopt_and_migrate(&conn).unwrap();
        assert_eq!(outcome, AdoptionOutcome::Initialized);
        let marks: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(marks as u32, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn existing_tables_without_business_rows_are_adopted_without_refusal() {
        let conn = open();
        adopt_and_migrate(&conn).unwrap();
        // Re-running against the now-empty-but-existing schema must not refuse.
        let outcome = adopt_and_migrate(&conn).unwrap();
        assert_eq!(
            outcome,
            AdoptionOutcome::Adopted {
                marked_through: CURRENT_SCHEMA_VERSION
            }
        );
    }

    #[test]
    fn business_rows_without_legacy_marker_refuses_adoption() {
        let conn = open();
        create_all_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO storage_configs (id, name, storage_type, config_json, enable_disk_usage, is_default, is_public, created_at) \
             VALUES ('sc1', 'primary', 'LOCAL', '{}', 0, 1, 0, 0)",
            [],
        )
        .unwrap();
        let err = adopt_and_migrate(&conn).unwrap_err();
        assert!(matches!(err, DbError::SchemaAdoption(_)));
    }

    #[test]
    fn business_rows_with_legacy_marker_squash_marks_through_legacy_version() {
        let conn = open();
        create_all_tables(&conn).unwrap();
        conn.execute(
            "INSERT INTO storage_configs (id, name, storage_type, config_json, enable_disk_usage, is_default, is_public, created_at) \
             VALUES ('sc1', 'primary', 'LOCAL', '{}', 0, 1, 0, 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO system_settings (key, value) VALUES ('schema_version', '1')",
            [],
        )
        .unwrap();
        let outcome = adopt_and_migrate(&conn).unwrap();
        assert_eq!(outcome, AdoptionOutcome::Adopted { marked_through: 1 });

        let remaining: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM system_settings WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(remaining, 0, "legacy schema_version key must be removed on successful adopt");
    }
}
