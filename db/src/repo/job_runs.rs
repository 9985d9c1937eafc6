// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `scheduled_job_runs` repository (§3 `JobRun`, §4.4 History): a bounded per-task ring of past
//! invocations, consulted by the admin `.../runs` endpoint (§6).

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{DbError, DbResult};
use crate::models::{JobRun, JobRunStatus};

/// History depth kept per task before older rows are pruned (§4.4 History is bounded, not
/// unbounded, to keep `scheduled_job_runs` from growing forever on a tight cron).
const MAX_RUNS_PER_TASK: i64 = 200;

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRun> {
    let status_str: String = row.get(4)?;
    let status = JobRunStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown job run status `{status_str}`").into(),
        )
    })?;
    let stats_raw: Option<String> = row.get(5)?;
    let stats_json = stats_raw
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(err))
        })?;
    Ok(JobRun {
        task_id: row.get(0)?,
        run_id: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        status,
        stats_json,
        error: row.get(6)?,
    })
}

const SELECT_COLUMNS: &str = "task_id, run_id, started_at, finished_at, status, stats_json, error";

pub fn start_run(conn: &Connection, task_id: &str, run_id: &str, started_at: i64) -> DbResult<()> {
    conn.execute(
        "INSERT INTO scheduled_job_runs (task_id, run_id, started_at, status) VALUES (?1, ?2, ?3, ?4)",
        params![task_id, run_id, started_at, JobRunStatus::Running.as_str()],
    )?;
    Ok(())
}

pub fn finish_run(
    conn: &Connection,
    task_id: &str,
    run_id: &str,
    finished_at: i64,
    status: JobRunStatus,
    stats_json: Option<&serde_json::Value>,
    error: Option<&str>,
) -> DbResult<()> {
    let stats_text = stats_json.map(serde_json::to_string).transpose().map_err(|err| {
        DbError::Validation(format!("failed to serialize job run stats: {err}"))
    })?;
    let changed = conn.execute(
        "UPDATE scheduled_job_runs SET finished_at = ?3, status = ?4, stats_json = ?5, error = ?6 \
         WHERE task_id = ?1 AND run_id = ?2",
        params![task_id, run_id, finished_at, status.as_str(), stats_text, error],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("job run `{run_id}` for task `{task_id}` not found")));
    }
    prune(conn, task_id)?;
    Ok(())
}

fn prune(conn: &Connection, task_id: &str) -> DbResult<()> {
    conn.execute(
        "DELETE FROM scheduled_job_runs WHERE task_id = ?1 AND run_id NOT IN ( \
             SELECT run_id FROM scheduled_job_runs WHERE task_id = ?1 ORDER BY started_at DESC LIMIT ?2 \
         )",
        params![task_id, MAX_RUNS_PER_TASK],
    )?;
    Ok(())
}

pub fn list_for_task(conn: &Connection, task_id: &str, limit: i64) -> DbResult<Vec<JobRun>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM scheduled_job_runs WHERE task_id = ?1 ORDER BY started_at DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![task_id, limit], row_to_run)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get(conn: &Connection, task_id: &str, run_id: &str) -> DbResult<JobRun> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM scheduled_job_runs WHERE task_id = ?1 AND run_id = ?2"),
        params![task_id, run_id],
        row_to_run,
    )
    .optional()?
    .ok_or_else(|| DbError::NotFound(format!("job run `{run_id}` for task `{task_id}` not found")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::migrations::adopt_and_migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn start_then_finish_round_trips() {
        let conn = fresh_conn();
        start_run(&conn, "job1", "run1", 100).unwrap();
        finish_run(&conn, "job1", "run1", 150, JobRunStatus::Success, None, None).unwrap();
        let run = get(&conn, "job1", "run1").unwrap();
        assert_eq!(run.status, JobRunStatus::Success);
        assert_eq!(run.finished_at, Some(150));
    }

    #[test]
    fn history_is_pruned_beyond_the_ring_size() {
        let conn = fresh_conn();
        for i in 0..(super::MAX_RUNS_PER_TASK + 10) {
            let run_id = format!("run{i}");
            start_run(&conn, "job1", &run_id, i).unwrap();
            finish_run(&conn, "job1", &run_id, i + 1, JobRunStatus::Success, None, None).unwrap();
        }
        let runs = list_for_task(&conn, "job1", 10_000).unwrap();
        assert_eq!(runs.len() as i64, super::MAX_RUNS_PER_TASK);
    }
}
