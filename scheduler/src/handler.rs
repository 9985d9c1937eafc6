// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The handler seam (§4.4: "the engine itself is generic"). `storagehub` registers the fixed
//! handler set named in §4.4 (`storage_usage_refresh`, `fs_index_rebuild`, `fs_index_apply_dirty`,
//! `copy`) against a `HandlerRegistry`; the runner only ever knows `Handler`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;

/// What a handler invocation was given. `cancel` is fired when an admin cancels the run or the
/// lease expires (§4.4 Cancellation); handlers that do meaningful work in a loop must check it
/// between units of work.
pub struct HandlerContext {
    pub task_id: String,
    pub run_id: String,
    pub payload: Value,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs to completion (or until `ctx.cancel` fires) and returns the statistics blob persisted
    /// into `scheduled_job_runs.stats_json`.
    async fn run(&self, ctx: HandlerContext) -> Result<Value, SchedulerError>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry::default()
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.name().to_owned(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }
        async fn run(&self, _ctx: HandlerContext) -> Result<Value, SchedulerError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn registers_and_looks_up_by_name() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Noop));
        assert!(registry.get("noop").is_some());
        assert!(registry.get("missing").is_none());
    }
}
