// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The scheduler runner (§4.4 Model/Firing/Run-now/Cancellation): on each tick, claims every due
//! job's lease with a single predicated `UPDATE`, runs the winner's handler, and always releases
//! the lease (success or failure) before computing the next fire time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use db::models::{JobRunStatus, ScheduledJob};
use db::Db;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::fire::fire;
use crate::handler::{HandlerContext, HandlerRegistry};
use crate::ticker::Ticker;

pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Lease duration in seconds; must exceed the expected wall-time of the slowest handler
    /// (§4.4 Model).
    pub lease_seconds: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_interval: Duration::from_secs(30),
            lease_seconds: 300,
        }
    }
}

#[derive(Clone, Debug)]
pub enum TickOutcome {
    Ran { task_id: String, status: JobRunStatus },
    LostLease { task_id: String },
    HandlerMissing { task_id: String, handler_name: String },
}

pub struct Scheduler {
    db: Arc<Db>,
    handlers: HandlerRegistry,
    config: SchedulerConfig,
    ticker: Ticker,
    /// Cancellation tokens for runs currently in flight, keyed by `task_id`, so an admin cancel
    /// action (§4.4 Cancellation) can reach a running handler.
    running: Mutex<HashMap<String, CancellationToken>>,
}

impl Scheduler {
    pub fn new(db: Arc<Db>, handlers: HandlerRegistry, config: SchedulerConfig) -> Self {
        let interval_ms = config.tick_interval.as_millis() as i64;
        Scheduler {
            db,
            handlers,
            config,
            ticker: Ticker::new(interval_ms),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `tick_once` on `config.tick_interval` until the process shuts down. Intended to be
    /// spawned as a background task by `storagehub`.
    pub async fn run_forever(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            interval.tick().await;
            let now_ms = Ticker::now_ms();
            if let Err(err) = self.tick_once(now_ms).await {
                tracing::error!(error = %err, "scheduler tick failed");
            }
        }
    }

    /// One tick (§4.4, testable property 6): claim every due job's lease and run the winners.
    /// Exposed directly (rather than only via `run_forever`) so tests can drive ticks
    /// deterministically.
    pub async fn tick_once(&self, now_ms: i64) -> Result<Vec<TickOutcome>, SchedulerError> {
        let due = {
            let conn = self.db.lock().await;
            db::repo::scheduled_jobs::list_due(&conn, now_ms)?
        };
        let mut outcomes = Vec::with_capacity(due.len());
        for job in due {
            outcomes.push(self.claim_and_run(&job, now_ms).await?);
        }
        self.ticker.record_tick(now_ms, outcomes.len());
        Ok(outcomes)
    }

    async fn claim_and_run(&self, job: &ScheduledJob, now_ms: i64) -> Result<TickOutcome, SchedulerError> {
        let lease_until = now_ms.saturating_add(self.config.lease_seconds.saturating_mul(1000));
        let won = {
            let conn = self.db.lock().await;
            db::repo::scheduled_jobs::try_acquire_lease(&conn, &job.task_id, now_ms, lease_until)?
        };
        if !won {
            return Ok(TickOutcome::LostLease {
                task_id: job.task_id.clone(),
            });
        }

        let Some(handler) = self.handlers.get(&job.handler_name) else {
            // Release immediately: there is nothing to run, and holding a lease for a handler
            // that will never exist would stall the job forever.
            let conn = self.db.lock().await;
            let next_run_after = fire(job.cron_expr.as_deref(), job.interval_seconds, now_ms).unwrap_or(now_ms + 60_000);
            db::repo::scheduled_jobs::release_lease(&conn, &job.task_id, now_ms, next_run_after)?;
            return Ok(TickOutcome::HandlerMissing {
                task_id: job.task_id.clone(),
                handler_name: job.handler_name.clone(),
            });
        };

        let run_id = Uuid::new_v4().to_string();
        {
            let conn = self.db.lock().await;
            db::repo::job_runs::start_run(&conn, &job.task_id, &run_id, now_ms)?;
        }

        let cancel = CancellationToken::new();
        self.running.lock().await.insert(job.task_id.clone(), cancel.clone());

        let ctx = HandlerContext {
            task_id: job.task_id.clone(),
            run_id: run_id.clone(),
            payload: job.payload_json.clone(),
            cancel: cancel.clone(),
        };
        let result = handler.run(ctx).await;
        self.running.lock().await.remove(&job.task_id);

        let finished_at = Ticker::now_ms();
        let (status, stats, error) = match result {
            Ok(stats) => (JobRunStatus::Success, Some(stats), None),
            Err(err) if cancel.is_cancelled() => (JobRunStatus::Cancelled, None, Some(err.to_string())),
            Err(err) => (JobRunStatus::Failed, None, Some(err.to_string())),
        };

        let next_run_after = fire(job.cron_expr.as_deref(), job.interval_seconds, finished_at).unwrap_or(finished_at + 60_000);
        {
            let conn = self.db.lock().await;
            db::repo::job_runs::finish_run(&conn, &job.task_id, &run_id, finished_at, status, stats.as_ref(), error.as_deref())?;
            db::repo::scheduled_jobs::release_lease(&conn, &job.task_id, finished_at, next_run_after)?;
        }

        Ok(TickOutcome::Ran {
            task_id: job.task_id.clone(),
            status,
        })
    }

    /// Admin "run now" (§4.4 Run-now): skips the `next_run_after` check but a lease is still
    /// required at the next tick.
    pub async fn run_now(&self, task_id: &str) -> Result<(), SchedulerError> {
        let now_ms = Ticker::now_ms();
        let conn = self.db.lock().await;
        db::repo::scheduled_jobs::mark_run_now(&conn, task_id, now_ms)?;
        Ok(())
    }

    /// Admin cancel (§4.4 Cancellation): fires the cancel token for a currently-running task, if
    /// any. A no-op if the task isn't running right now.
    pub async fn cancel(&self, task_id: &str) -> bool {
        if let Some(token) = self.running.lock().await.get(task_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::handler::Handler;

    struct CountingHandler(std::sync::Arc<std::sync::atomic::AtomicUsize>);

    #[async_trait]
    impl Handler for CountingHandler {
        fn name(&self) -> &'static str {
            "count"
        }
        async fn run(&self, _ctx: HandlerContext) -> Result<serde_json::Value, SchedulerError> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(json!({"ran": true}))
        }
    }

    fn open_db() -> Arc<Db> {
        let db = Db::open_in_memory().unwrap();
        Arc::new(db)
    }

    async fn seed_job(db: &Db, task_id: &str, next_run_after: i64) {
        let conn = db.lock().await;
        db::repo::scheduled_jobs::upsert(
            &conn,
            &ScheduledJob {
                task_id: task_id.to_owned(),
                handler_name: "count".to_owned(),
                cron_expr: Some("*/5 * * * *".to_owned()),
                interval_seconds: None,
                enabled: true,
                last_run_started_at: None,
                last_run_finished_at: None,
                next_run_after,
                lock_until: None,
                run_count: 0,
                payload_json: json!({}),
                meta_json: json!({}),
            },
        )
        .unwrap();
    }

    #[tokio::test]
    async fn tick_runs_exactly_one_due_job() {
        let db = open_db();
        db.migrate().await.unwrap();
        seed_job(&db, "job1", 100).await;
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(CountingHandler(counter.clone())));
        let scheduler = Scheduler::new(db, handlers, SchedulerConfig::default());
        let outcomes = scheduler.tick_once(100).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(&outcomes[0], TickOutcome::Ran { status: JobRunStatus::Success, .. }));
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_handler_releases_the_lease_instead_of_stalling() {
        let db = open_db();
        db.migrate().await.unwrap();
        {
            let conn = db.lock().await;
            db::repo::scheduled_jobs::upsert(
                &conn,
                &ScheduledJob {
                    task_id: "job1".to_owned(),
                    handler_name: "nonexistent".to_owned(),
                    cron_expr: Some("*/5 * * * *".to_owned()),
                    interval_seconds: None,
                    enabled: true,
                    last_run_started_at: None,
                    last_run_finished_at: None,
                    next_run_after: 100,
                    lock_until: None,
                    run_count: 0,
                    payload_json: json!({}),
                    meta_json: json!({}),
                },
            )
            .unwrap();
        }
        let scheduler = Scheduler::new(db.clone(), HandlerRegistry::new(), SchedulerConfig::default());
        let outcomes = scheduler.tick_once(100).await.unwrap();
        assert!(matches!(&outcomes[0], TickOutcome::HandlerMissing { .. }));
        let conn = db.lock().await;
        let job = db::repo::scheduled_jobs::get(&conn, "job1").unwrap();
        assert!(job.lock_until.is_none());
    }

    #[tokio::test]
    async fn run_now_makes_a_future_job_immediately_due() {
        let db = open_db();
        db.migrate().await.unwrap();
        seed_job(&db, "job1", i64::MAX / 2).await;
        let scheduler = Scheduler::new(db.clone(), HandlerRegistry::new(), SchedulerConfig::default());
        scheduler.run_now("job1").await.unwrap();
        let conn = db.lock().await;
        let job = db::repo::scheduled_jobs::get(&conn, "job1").unwrap();
        assert!(job.next_run_after <= Ticker::now_ms());
    }
}
