// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use storage::error::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression `{0}`: {1}")]
    InvalidCron(String, String),
    #[error("job `{0}` has neither cron_expr nor interval_seconds set")]
    NoSchedule(String),
    #[error(transparent)]
    Db(#[from] db::DbError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("no handler registered for `{0}`")]
    HandlerNotFound(String),
    #[error("{0}")]
    Cancelled(String),
}

impl From<SchedulerError> for StorageError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Storage(inner) => inner,
            SchedulerError::Db(inner) => inner.into(),
            SchedulerError::InvalidCron(..) | SchedulerError::NoSchedule(_) => {
                StorageError::validation(err.to_string())
            }
            SchedulerError::HandlerNotFound(_) => StorageError::not_found(err.to_string()),
            SchedulerError::Cancelled(_) => StorageError::busy(err.to_string()),
        }
    }
}
