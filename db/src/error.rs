// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use storage::error::StorageError;
use thiserror::Error;

/// Errors raised by the `db` crate. Converts into the engine-wide [`StorageError`] taxonomy
/// (§7) at every call site that crosses into `storage`/`scheduler`, the same way the teacher's
/// driver errors convert into `tonic::Status` only at the gRPC boundary and stay a plain enum
/// everywhere upstream of that.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    SchemaAdoption(String),
}

impl From<DbError> for StorageError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => StorageError::not_found(msg),
            DbError::Conflict(msg) => StorageError::busy(msg),
            DbError::Validation(msg) => StorageError::validation(msg),
            DbError::Sqlite(_) | DbError::SchemaAdoption(_) => {
                StorageError::driver(500, err.to_string())
            }
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
