// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

pub(crate) fn job_row(id: &str) -> JobRow {
    JobRow {
        serial: 0,
        job_id: id.into(),
        queue: "q".to_string(),
        jobset: "s".to_string(),
        priority: 10,
        submitted_ms: 0,
        queue_ttl_secs: None,
        queued: true,
        queued_version: 1,
        cancel_requested: false,
        cancel_by_jobset_requested: false,
        cancelled: false,
        succeeded: false,
        failed: false,
        scheduling_info: serde_json::json!({"version": 1, "priority_class": ""}),
        scheduling_info_version: 1,
    }
}

pub(crate) fn run_row(run_id: RunId, job_id: &str) -> RunRow {
    RunRow {
        serial: 0,
        run_id,
        job_id: job_id.into(),
        created_ms: 0,
        executor: "e1".to_string(),
        node: "e1-n1".to_string(),
        scheduled_at_priority: 0,
        pending: false,
        running: false,
        preempted: false,
        succeeded: false,
        failed: false,
        cancelled: false,
        returned: false,
        run_attempted: false,
    }
}

#[tokio::test]
async fn serials_are_assigned_monotonically() {
    let repo = InMemoryRepository::new();
    let s1 = repo.push_job(job_row("j1"));
    let s2 = repo.push_run(run_row(RunId::new(), "j1"));
    let s3 = repo.push_job(job_row("j2"));
    assert!(s1 < s2 && s2 < s3);
}

#[tokio::test]
async fn fetch_returns_only_rows_past_the_cursor() {
    let repo = InMemoryRepository::new();
    repo.push_job(job_row("j1"));
    let cursor = repo.push_job(job_row("j2"));
    repo.push_job(job_row("j3"));

    let (jobs, runs) = repo.fetch_job_updates(cursor, 0).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_id, "j3");
    assert!(runs.is_empty());
}

#[tokio::test]
async fn fetch_replays_everything_from_zero() {
    let repo = InMemoryRepository::new();
    repo.push_job(job_row("j1"));
    repo.push_run(run_row(RunId::new(), "j1"));

    let (jobs, runs) = repo.fetch_job_updates(0, 0).await.unwrap();
    assert_eq!((jobs.len(), runs.len()), (1, 1));
}

#[tokio::test]
async fn injected_failures_are_consumed() {
    let repo = InMemoryRepository::new();
    repo.fail_next_fetches(1);
    assert!(repo.fetch_job_updates(0, 0).await.is_err());
    assert!(repo.fetch_job_updates(0, 0).await.is_ok());
}

#[tokio::test]
async fn run_errors_only_returned_for_requested_ids() {
    let repo = InMemoryRepository::new();
    let known = RunId::new();
    let other = RunId::new();
    repo.set_run_error(known, "oom killed");
    repo.set_run_error(other, "node lost");

    let errors = repo.fetch_job_run_errors(&[known]).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.get(&known).map(String::as_str), Some("oom killed"));
}

#[tokio::test]
async fn inactive_runs_are_filtered() {
    let repo = InMemoryRepository::new();
    let stale = RunId::new();
    let live = RunId::new();
    repo.mark_inactive(stale);

    let inactive = repo.find_inactive_runs(&[stale, live]).await.unwrap();
    assert_eq!(inactive, vec![stale]);
}
