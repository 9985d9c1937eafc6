// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![allow(clippy::new_without_default, clippy::len_without_is_empty)]

pub use digest::Digest;

pub mod backends;
pub mod capability;
pub mod contract;
pub mod enforcer;
pub mod error;
pub mod mount;
pub mod quota;
pub mod range;
pub mod registry;
pub mod stream;
pub mod ttl_cache;

pub mod testutil;
