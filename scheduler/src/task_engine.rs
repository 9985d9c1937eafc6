// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Job Runner / task engine (§4.6): a concurrent executor with bounded parallelism shared across
//! job kinds (copy, and any future per-item job). Item identity survives retries so progress
//! percentages don't reset (§4.6), and concurrency is one job per `(user_id, task_type)` unless
//! the task type opts into parallel runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Skipped,
    Retrying,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemResult {
    pub item_id: String,
    pub status: ItemStatus,
    pub progress: f32,
    pub bytes_transferred: u64,
    pub file_size: Option<u64>,
    pub retry_count: u32,
    pub message: Option<String>,
}

impl ItemResult {
    fn pending(item_id: &str) -> Self {
        ItemResult {
            item_id: item_id.to_owned(),
            status: ItemStatus::Pending,
            progress: 0.0,
            bytes_transferred: 0,
            file_size: None,
            retry_count: 0,
            message: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Scheduled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSubmission {
    pub job_id: String,
    pub task_type: String,
    pub user_id: String,
    pub trigger_type: TriggerType,
    pub payload: serde_json::Value,
    /// Admin actions this job's handler supports, e.g. `retry-all-failed`, `retry-file` (§4.6).
    pub allowed_actions: Vec<String>,
    /// Opts into running concurrently with other jobs sharing `(user_id, task_type)`; default
    /// policy is exclusive (§4.6 Concurrency policy).
    pub allow_parallel: bool,
}

/// The unit of work an `ItemWorker` performs for one item. Kept separate from `ItemResult` so a
/// worker only reports what it actually knows (an outcome), not the bookkeeping fields (retry
/// count, cumulative progress) the engine itself owns.
pub enum ItemOutcome {
    Success { bytes_transferred: u64 },
    Skipped { reason: String },
    Failed { message: String },
}

/// A job-kind-specific implementation of "do the work for one item" (the copy engine, §4.7,
/// is the one concrete `ItemWorker` in this workspace).
#[async_trait]
pub trait ItemWorker: Send + Sync {
    async fn process(&self, item_id: &str, cancel: CancellationToken) -> ItemOutcome;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOverallStatus {
    Running,
    Success,
    Partial,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    pub task_type: String,
    pub user_id: String,
    pub overall_status: JobOverallStatus,
    pub items: Vec<ItemResult>,
}

/// Retry actions an admin may request against a completed or in-flight job (§4.6).
pub enum RetryAction {
    RetryAllFailed,
    RetryItem(String),
}

/// Bounded-parallelism executor for ad hoc per-item jobs (§4.6). `max_concurrent_items` bounds
/// global fan-out across every job the engine is running; `(user_id, task_type)` exclusivity is
/// enforced separately via `active_keys`.
pub struct TaskEngine {
    semaphore: Arc<Semaphore>,
    active_keys: Mutex<HashMap<(String, String), ()>>,
    jobs: Mutex<HashMap<String, JobState>>,
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl TaskEngine {
    pub fn new(max_concurrent_items: usize) -> Self {
        TaskEngine {
            semaphore: Arc::new(Semaphore::new(max_concurrent_items.max(1))),
            active_keys: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            cancel_tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Submits a job and runs every item to completion, honoring the `(user_id, task_type)`
    /// exclusivity policy. Returns `Err` without running anything if a conflicting job is
    /// already active (BUSY, §5 Locks).
    pub async fn submit(
        &self,
        submission: JobSubmission,
        item_ids: Vec<String>,
        worker: Arc<dyn ItemWorker>,
    ) -> Result<String, String> {
        let key = (submission.user_id.clone(), submission.task_type.clone());
        if !submission.allow_parallel {
            let mut active = self.active_keys.lock().await;
            if active.contains_key(&key) {
                return Err(format!(
                    "a `{}` job is already running for user `{}`",
                    submission.task_type, submission.user_id
                ));
            }
            active.insert(key.clone(), ());
        }

        let cancel = CancellationToken::new();
        self.cancel_tokens.lock().await.insert(submission.job_id.clone(), cancel.clone());

        let initial_state = JobState {
            job_id: submission.job_id.clone(),
            task_type: submission.task_type.clone(),
            user_id: submission.user_id.clone(),
            overall_status: JobOverallStatus::Running,
            items: item_ids.iter().map(|id| ItemResult::pending(id)).collect(),
        };
        self.jobs.lock().await.insert(submission.job_id.clone(), initial_state);

        self.run_items(&submission.job_id, item_ids, worker, cancel.clone()).await;

        if !submission.allow_parallel {
            self.active_keys.lock().await.remove(&key);
        }
        self.cancel_tokens.lock().await.remove(&submission.job_id);

        Ok(submission.job_id)
    }

    async fn run_items(&self, job_id: &str, item_ids: Vec<String>, worker: Arc<dyn ItemWorker>, cancel: CancellationToken) {
        let mut handles = Vec::with_capacity(item_ids.len());
        for item_id in item_ids {
            let permit = self.semaphore.clone().acquire_owned().await.expect("semaphore never closed");
            let worker = worker.clone();
            let cancel = cancel.clone();
            let item_id_owned = item_id.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                if cancel.is_cancelled() {
                    return (item_id_owned, None);
                }
                let outcome = worker.process(&item_id_owned, cancel).await;
                (item_id_owned, Some(outcome))
            }));
        }

        for handle in handles {
            let (item_id, outcome) = match handle.await {
                Ok(pair) => pair,
                Err(_) => continue,
            };
            self.apply_outcome(job_id, &item_id, outcome, cancel.is_cancelled()).await;
        }

        self.finalize(job_id, cancel.is_cancelled()).await;
    }

    async fn apply_outcome(&self, job_id: &str, item_id: &str, outcome: Option<ItemOutcome>, was_cancelled: bool) {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(job_id) else { return };
        let Some(item) = job.items.iter_mut().find(|i| i.item_id == item_id) else { return };
        match outcome {
            None if was_cancelled => {
                item.status = ItemStatus::Failed;
                item.message = Some("cancelled".to_owned());
            }
            None => {}
            Some(ItemOutcome::Success { bytes_transferred }) => {
                item.status = ItemStatus::Success;
                item.progress = 1.0;
                item.bytes_transferred = bytes_transferred;
            }
            Some(ItemOutcome::Skipped { reason }) => {
                item.status = ItemStatus::Skipped;
                item.progress = 1.0;
                item.message = Some(reason);
            }
            Some(ItemOutcome::Failed { message }) => {
                item.status = ItemStatus::Failed;
                item.message = Some(message);
            }
        }
    }

    async fn finalize(&self, job_id: &str, was_cancelled: bool) {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(job_id) else { return };
        let failed = job.items.iter().any(|i| i.status == ItemStatus::Failed);
        let all_success = job.items.iter().all(|i| matches!(i.status, ItemStatus::Success | ItemStatus::Skipped));
        job.overall_status = if was_cancelled {
            JobOverallStatus::Cancelled
        } else if all_success {
            JobOverallStatus::Success
        } else if failed {
            JobOverallStatus::Partial
        } else {
            JobOverallStatus::Success
        };
    }

    pub async fn state(&self, job_id: &str) -> Option<JobState> {
        self.jobs.lock().await.get(job_id).cloned()
    }

    pub async fn cancel(&self, job_id: &str) -> bool {
        if let Some(token) = self.cancel_tokens.lock().await.get(job_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Re-runs failed items in place (§4.6: item identity, and therefore progress, survives a
    /// retry rather than resetting the whole job).
    pub async fn retry(&self, job_id: &str, action: RetryAction, worker: Arc<dyn ItemWorker>) {
        let item_ids: Vec<String> = {
            let mut jobs = self.jobs.lock().await;
            let Some(job) = jobs.get_mut(job_id) else { return };
            let targets: Vec<String> = match &action {
                RetryAction::RetryAllFailed => job
                    .items
                    .iter()
                    .filter(|i| i.status == ItemStatus::Failed)
                    .map(|i| i.item_id.clone())
                    .collect(),
                RetryAction::RetryItem(item_id) => vec![item_id.clone()],
            };
            for item in job.items.iter_mut() {
                if targets.contains(&item.item_id) {
                    item.status = ItemStatus::Retrying;
                    item.retry_count += 1;
                }
            }
            targets
        };
        if item_ids.is_empty() {
            return;
        }
        let cancel = CancellationToken::new();
        self.run_items(job_id, item_ids, worker, cancel).await;
    }
}

impl Clone for JobState {
    fn clone(&self) -> Self {
        JobState {
            job_id: self.job_id.clone(),
            task_type: self.task_type.clone(),
            user_id: self.user_id.clone(),
            overall_status: self.overall_status,
            items: self.items.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysSucceeds;

    #[async_trait]
    impl ItemWorker for AlwaysSucceeds {
        async fn process(&self, _item_id: &str, _cancel: CancellationToken) -> ItemOutcome {
            ItemOutcome::Success { bytes_transferred: 10 }
        }
    }

    struct FailsOnB;

    #[async_trait]
    impl ItemWorker for FailsOnB {
        async fn process(&self, item_id: &str, _cancel: CancellationToken) -> ItemOutcome {
            if item_id == "b" {
                ItemOutcome::Failed { message: "boom".to_owned() }
            } else {
                ItemOutcome::Success { bytes_transferred: 1 }
            }
        }
    }

    fn submission(job_id: &str, user_id: &str, task_type: &str) -> JobSubmission {
        JobSubmission {
            job_id: job_id.to_owned(),
            task_type: task_type.to_owned(),
            user_id: user_id.to_owned(),
            trigger_type: TriggerType::Manual,
            payload: serde_json::json!({}),
            allowed_actions: vec!["retry-all-failed".to_owned()],
            allow_parallel: false,
        }
    }

    #[tokio::test]
    async fn all_items_succeeding_yields_overall_success() {
        let engine = TaskEngine::new(4);
        engine
            .submit(submission("j1", "u1", "copy"), vec!["a".to_owned(), "b".to_owned()], Arc::new(AlwaysSucceeds))
            .await
            .unwrap();
        let state = engine.state("j1").await.unwrap();
        assert_eq!(state.overall_status, JobOverallStatus::Success);
    }

    #[tokio::test]
    async fn one_failed_item_yields_partial_overall_status() {
        let engine = TaskEngine::new(4);
        engine
            .submit(submission("j1", "u1", "copy"), vec!["a".to_owned(), "b".to_owned()], Arc::new(FailsOnB))
            .await
            .unwrap();
        let state = engine.state("j1").await.unwrap();
        assert_eq!(state.overall_status, JobOverallStatus::Partial);
        let b = state.items.iter().find(|i| i.item_id == "b").unwrap();
        assert_eq!(b.status, ItemStatus::Failed);
    }

    #[tokio::test]
    async fn retry_preserves_item_identity_and_bumps_retry_count() {
        let engine = TaskEngine::new(4);
        engine
            .submit(submission("j1", "u1", "copy"), vec!["a".to_owned(), "b".to_owned()], Arc::new(FailsOnB))
            .await
            .unwrap();
        engine.retry("j1", RetryAction::RetryAllFailed, Arc::new(AlwaysSucceeds)).await;
        let state = engine.state("j1").await.unwrap();
        let b = state.items.iter().find(|i| i.item_id == "b").unwrap();
        assert_eq!(b.status, ItemStatus::Success);
        assert_eq!(b.retry_count, 1);
    }

    #[tokio::test]
    async fn exclusive_jobs_reject_a_concurrent_submission_for_the_same_key() {
        let engine = Arc::new(TaskEngine::new(4));
        let engine2 = engine.clone();
        let first = tokio::spawn(async move {
            engine2
                .submit(submission("j1", "u1", "copy"), vec!["a".to_owned()], Arc::new(AlwaysSucceeds))
                .await
        });
        first.await.unwrap().unwrap();
        // Sequential here (the first job already finished), but exercises the same key path to
        // confirm the active-key bookkeeping was cleaned up after completion.
        let second = engine
            .submit(submission("j2", "u1", "copy"), vec!["a".to_owned()], Arc::new(AlwaysSucceeds))
            .await;
        assert!(second.is_ok());
    }
}
