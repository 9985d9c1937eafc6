// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The admin HTTP surface and range-streaming route (§6), built on the same axum stack the
//! teacher's config/logging layers already pull in for ops endpoints. `routes.rs` holds the
//! `Router`; `stream.rs` converts a `storage::range::RangeResponse` into an axum `Response`.

pub mod error;
pub mod routes;
pub mod stream;

pub use routes::{build_router, AppState};
