// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A single-connection SQLite handle shared across the process. SQLite serializes writers
//! regardless of how many connections are opened, so rather than pool connections (as a
//! multi-writer backend would) we hold one `rusqlite::Connection` behind an async mutex and
//! let callers await their turn; `busy_timeout` covers the rare case of an external tool
//! (`sqlite3 storagehub.db`) holding the file lock concurrently.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::error::DbResult;
use crate::schema;

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Opens (creating if absent) the sqlite file at `path`, applies pragmas, and runs the
    /// schema-adopt decision (§4.5) to bring the schema up to date.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        let db = Db {
            conn: Mutex::new(conn),
        };
        Ok(db)
    }

    /// In-memory database, used by tests and by `storagehub`'s hermetic integration suite.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Db {
            conn: Mutex::new(conn),
        })
    }

    fn configure(conn: &Connection) -> DbResult<()> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(())
    }

    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Runs schema-adopt (§4.5) then applies the fixed DDL; idempotent, safe to call on every
    /// startup.
    pub async fn migrate(&self) -> DbResult<crate::migrations::AdoptionOutcome> {
        let conn = self.lock().await;
        crate::migrations::adopt_and_migrate(&conn)
    }
}

#[allow(unused)]
pub(crate) fn schema_statements() -> &'static [&'static str] {
    schema::ALL_TABLES
}
