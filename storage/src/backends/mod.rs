// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Illustrative driver implementations. `memory` and `local` are fully functional; `stub` covers
//! every other storage type identifier this workspace declares but does not ship a backend for.

pub mod local;
pub mod memory;
pub mod stub;
