// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]

//! Persistence for the engine's control plane: storage configs, mounts, cached usage snapshots,
//! the scheduler's job table and run history, and the VFS/search-index inventories that back the
//! slower quota tiers (§3, §6). A single SQLite file behind one connection, the way a small
//! control-plane store doesn't need a connection pool -- see `pool::Db` for why.

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod repo;
pub mod schema;

pub use error::{DbError, DbResult};
pub use pool::Db;

/// Milliseconds since the Unix epoch. Centralized so every repo module stamps timestamps the
/// same way instead of each calling `chrono` directly.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
