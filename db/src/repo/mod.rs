// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Repository functions: one module per persisted table (§6), each a thin set of free functions
//! taking `&Connection` rather than a repository struct, the way the teacher's own storage
//! backends take a borrowed handle per call instead of holding one behind `self`.

pub mod dirty_queue;
pub mod job_runs;
pub mod metrics;
pub mod mounts;
pub mod scheduled_jobs;
pub mod search_index;
pub mod storage_configs;
pub mod vfs_nodes;

use rusqlite::Row;
use serde_json::Value;

use crate::error::DbResult;

/// Parses a `TEXT` column holding a JSON document. Every `*_json` column in this schema is
/// written with `serde_json::to_string` and is therefore always valid JSON; a parse failure here
/// means the row was corrupted by something outside this crate, which we treat as a bug rather
/// than a recoverable condition.
pub(crate) fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}

pub(crate) fn to_json_text(value: &Value) -> DbResult<String> {
    serde_json::to_string(value).map_err(|err| {
        crate::error::DbError::Validation(format!("failed to serialize json column: {err}"))
    })
}
