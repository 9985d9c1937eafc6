// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

//! Persistent Scheduler (§4.4): a leased, cron-driven job runner, the generic task engine (§4.6)
//! used by long-running per-item jobs, and the illustrative copy engine handler (§4.7). Grounded
//! on the teacher's CAS-retry idiom (its sharded storage decorator claims a shard with a single
//! predicated `UPDATE` rather than a distributed lock) generalized from an in-process Redis
//! pool to the `scheduled_jobs.lock_until` column in `db`.

pub mod error;
pub mod fire;
pub mod handler;
pub mod handlers;
pub mod runner;
pub mod task_engine;
pub mod ticker;

pub use error::SchedulerError;
pub use handler::{Handler, HandlerContext, HandlerRegistry};
pub use runner::{Scheduler, SchedulerConfig, TickOutcome};
pub use task_engine::{ItemOutcome, ItemResult, ItemStatus, ItemWorker, JobOverallStatus, JobState, JobSubmission, RetryAction, TaskEngine, TriggerType};
