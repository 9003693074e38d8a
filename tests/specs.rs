// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level scheduler scenarios: the cycle driver and the executor
//! API wired together over shared in-memory collaborators, the way `fmd`
//! assembles them.

use fm_adapters::{InMemoryRepository, InMemorySink, JobRepository, JobRow, RunRow};
use fm_core::{Event, FakeClock, Job, RunId};
use fm_daemon::ExecutorApi;
use fm_jobdb::{JobDb, PriorityClass, PriorityClasses};
use fm_scheduler::{
    CycleConfig, CycleDriver, ExecutorRegistry, FirstFit, Publisher, StandaloneLeader,
};
use fm_wire::{LeaseRequest, LeaseStreamMessage, NodeInfo};
use std::sync::Arc;
use std::time::Duration;

struct Cluster {
    db: Arc<JobDb>,
    repo: Arc<InMemoryRepository>,
    sink: Arc<InMemorySink>,
    clock: FakeClock,
    driver: CycleDriver<FakeClock>,
    api: Arc<ExecutorApi<FakeClock>>,
}

fn cluster() -> Cluster {
    let mut classes = PriorityClasses::new();
    classes.insert("batch".into(), PriorityClass { priority: 40, preemptible: true });
    let db = Arc::new(JobDb::new(classes));
    let repo = Arc::new(InMemoryRepository::new());
    let sink = Arc::new(InMemorySink::new());
    let registry = Arc::new(ExecutorRegistry::new(8));
    let leader = Arc::new(StandaloneLeader::new());
    let clock = FakeClock::at(1_000_000);
    let driver = CycleDriver::new(
        db.clone(),
        repo.clone(),
        Arc::new(Publisher::new(sink.clone())),
        leader.clone(),
        registry.clone(),
        Arc::new(FirstFit::new()),
        clock.clone(),
        CycleConfig {
            cycle_period: Duration::from_secs(1),
            schedule_every: 1,
            executor_timeout: Duration::from_secs(60),
            max_attempts: 2,
        },
        "node-id",
    );
    let api = Arc::new(ExecutorApi::new(
        db.clone(),
        repo.clone() as Arc<dyn JobRepository>,
        registry,
        leader,
        sink.clone(),
        clock.clone(),
    ));
    Cluster { db, repo, sink, clock, driver, api }
}

fn job_row(id: &str, submitted_ms: u64) -> JobRow {
    JobRow {
        serial: 0,
        job_id: id.into(),
        queue: "analytics".to_string(),
        jobset: "nightly".to_string(),
        priority: 10,
        submitted_ms,
        queue_ttl_secs: None,
        queued: true,
        queued_version: 1,
        cancel_requested: false,
        cancel_by_jobset_requested: false,
        cancelled: false,
        succeeded: false,
        failed: false,
        scheduling_info: serde_json::json!({
            "version": 1,
            "priority_class": "batch",
            "resources": {"cpu": "1"},
        }),
        scheduling_info_version: 1,
    }
}

fn run_row(run_id: RunId, job_id: &str, node: &str) -> RunRow {
    RunRow {
        serial: 0,
        run_id,
        job_id: job_id.into(),
        created_ms: 1_000_000,
        executor: "exec-1".to_string(),
        node: node.to_string(),
        scheduled_at_priority: 40,
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

fn lease_request(running: Vec<RunId>) -> LeaseRequest {
    LeaseRequest {
        executor_id: "exec-1".into(),
        pool: "default".into(),
        resources: Default::default(),
        minimum_job_size: Default::default(),
        nodes: vec![NodeInfo {
            name: "node-a".into(),
            allocatable: [("cpu".into(), "8".parse().unwrap())].into_iter().collect(),
            run_ids: running,
            taints: vec![],
            labels: [("node-id".to_string(), "exec-1-node-a".to_string())].into_iter().collect(),
        }],
        unassigned_job_run_ids: vec![],
        max_jobs_to_lease: 8,
    }
}

fn job(c: &Cluster, id: &str) -> Job {
    c.db.read_txn().get_by_id(&id.into()).cloned().unwrap()
}

/// S1 end to end: submission reaches the executor as a lease on its stream.
#[tokio::test]
async fn submitted_job_flows_to_the_executor() {
    let mut c = cluster();
    c.repo.push_job(job_row("j1", 1_000_000));

    // Heartbeat announces capacity; the scheduling pass then leases onto it.
    let burst = c.api.lease_burst(&lease_request(vec![])).await;
    assert_eq!(burst, vec![LeaseStreamMessage::EndMarker]);
    c.driver.cycle(true).await.unwrap();

    let leased = job(&c, "j1");
    assert!(!leased.queued);
    assert_eq!(leased.queued_version, 2);
    let run = leased.latest_run().unwrap().clone();
    assert_eq!(run.node, "exec-1-node-a");

    let burst = c.api.lease_burst(&lease_request(vec![])).await;
    match burst.as_slice() {
        [LeaseStreamMessage::Lease(lease), LeaseStreamMessage::EndMarker] => {
            assert_eq!(lease.job_run_id, run.id);
            assert_eq!(lease.queue, "analytics");
            assert_eq!(lease.jobset, "nightly");
        }
        other => panic!("unexpected burst: {other:?}"),
    }

    // Once the executor reports the run, it is not re-leased.
    let burst = c.api.lease_burst(&lease_request(vec![run.id])).await;
    assert_eq!(burst, vec![LeaseStreamMessage::EndMarker]);
}

/// A cancel request travels repo → cycle → executor stream.
#[tokio::test]
async fn cancellation_reaches_the_running_executor() {
    let mut c = cluster();
    c.repo.push_job(job_row("j1", 1_000_000));
    c.api.lease_burst(&lease_request(vec![])).await;
    c.driver.cycle(true).await.unwrap();
    let run = job(&c, "j1").latest_run().unwrap().clone();

    let mut cancel = job_row("j1", 1_000_000);
    cancel.cancel_requested = true;
    cancel.queued = false;
    cancel.queued_version = 2;
    c.repo.push_job(cancel);
    c.sink.take();
    c.driver.cycle(false).await.unwrap();

    let cancelled = job(&c, "j1");
    assert!(cancelled.cancelled);
    assert!(cancelled.runs.iter().all(|r| r.in_terminal_state()));
    let events: Vec<Event> = c.sink.published().into_iter().flat_map(|s| s.events).collect();
    assert!(matches!(events.as_slice(), [Event::CancelledJob { .. }]));

    // The executor still reports the run as running and is told to stop it.
    let burst = c.api.lease_burst(&lease_request(vec![run.id])).await;
    assert_eq!(
        burst,
        vec![
            LeaseStreamMessage::CancelRuns { job_run_ids: vec![run.id] },
            LeaseStreamMessage::EndMarker,
        ]
    );
}

/// S2/S6 end to end: one bounce requeues with anti-affinity, the second
/// bounce exhausts the budget.
#[tokio::test]
async fn lease_returns_requeue_then_terminate() {
    let mut c = cluster();
    c.repo.push_job(job_row("j1", 1_000_000));
    // Two nodes, so the post-bounce anti-affinity still leaves somewhere to go.
    let mut wide = lease_request(vec![]);
    wide.nodes.push(NodeInfo {
        name: "node-b".into(),
        allocatable: [("cpu".into(), "8".parse().unwrap())].into_iter().collect(),
        run_ids: vec![],
        taints: vec![],
        labels: [("node-id".to_string(), "exec-1-node-b".to_string())].into_iter().collect(),
    });
    c.api.lease_burst(&wide).await;
    c.driver.cycle(true).await.unwrap();

    let run1 = job(&c, "j1").latest_run().unwrap().clone();
    assert_eq!(run1.node, "exec-1-node-a");
    let mut bounce = run_row(run1.id, "j1", run1.node.as_str());
    bounce.failed = true;
    bounce.returned = true;
    bounce.run_attempted = true;
    c.repo.push_run(bounce);
    c.sink.take();
    c.driver.cycle(false).await.unwrap();

    let requeued = job(&c, "j1");
    assert!(requeued.queued);
    assert_eq!(requeued.queued_version, 3);
    assert_eq!(requeued.scheduling_info.version, 2);
    let events: Vec<Event> = c.sink.take().into_iter().flat_map(|s| s.events).collect();
    assert!(matches!(events.as_slice(), [Event::JobRequeued { .. }]));

    c.driver.cycle(true).await.unwrap();

    let releases = job(&c, "j1");
    let run2 = releases.latest_run().unwrap().clone();
    assert_eq!(run2.node, "exec-1-node-b");

    let mut bounce = run_row(run2.id, "j1", run2.node.as_str());
    bounce.failed = true;
    bounce.returned = true;
    bounce.run_attempted = true;
    c.repo.push_run(bounce);
    c.sink.take();
    c.driver.cycle(false).await.unwrap();

    let dead = job(&c, "j1");
    assert!(dead.failed);
    let events: Vec<Event> = c.sink.take().into_iter().flat_map(|s| s.events).collect();
    assert!(matches!(
        events.as_slice(),
        [Event::JobErrors { reason: fm_core::ErrorReason::TooManyAttempts { attempts: 2 }, .. }]
    ));
}

/// S4 end to end: a silent executor forfeits its leases.
#[tokio::test]
async fn silent_executor_expires_its_leases() {
    let mut c = cluster();
    c.repo.push_job(job_row("j1", 1_000_000));
    c.api.lease_burst(&lease_request(vec![])).await;
    c.driver.cycle(true).await.unwrap();
    c.sink.take();

    c.clock.advance(Duration::from_secs(90));
    c.driver.cycle(false).await.unwrap();

    let job = job(&c, "j1");
    assert!(job.failed);
    let events: Vec<Event> = c.sink.take().into_iter().flat_map(|s| s.events).collect();
    assert!(matches!(
        events.as_slice(),
        [
            Event::JobRunErrors { reason: fm_core::ErrorReason::LeaseExpired, .. },
            Event::JobErrors { reason: fm_core::ErrorReason::LeaseExpired, .. },
        ]
    ));
}

/// S7: a cycle whose publish fails changes nothing, and the retry publishes
/// the same event content.
#[tokio::test]
async fn failed_publish_is_invisible_and_retries_identically() {
    let mut c = cluster();
    c.repo.push_job(job_row("j1", 1_000_000));
    c.api.lease_burst(&lease_request(vec![])).await;

    c.sink.fail_next_publishes(1);
    assert!(c.driver.cycle(true).await.is_err());
    assert!(c.db.read_txn().is_empty());
    assert!(c.sink.published().is_empty());

    c.driver.cycle(true).await.unwrap();
    let events: Vec<Event> = c.sink.published().into_iter().flat_map(|s| s.events).collect();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Event::JobRunLeased { .. }));
    assert_eq!(job(&c, "j1").queued_version, 2);
}

/// Invariant 6: replaying the whole feed from serial 0 rebuilds the same
/// JobDb state that incremental cycles produced.
#[tokio::test]
async fn replay_from_zero_matches_incremental_state() {
    let mut c = cluster();

    // Build up history across several cycles.
    c.repo.push_job(job_row("j1", 1_000_000));
    c.repo.push_job(job_row("j2", 1_000_100));
    c.api.lease_burst(&lease_request(vec![])).await;
    c.driver.cycle(true).await.unwrap();

    let run1 = job(&c, "j1").latest_run().unwrap().clone();
    let run2 = job(&c, "j2").latest_run().unwrap().clone();
    let mut done = run_row(run1.id, "j1", run1.node.as_str());
    done.succeeded = true;
    done.run_attempted = true;
    c.repo.push_run(done);
    let mut cancel = job_row("j2", 1_000_100);
    cancel.cancel_requested = true;
    c.repo.push_job(cancel);
    c.driver.cycle(false).await.unwrap();

    // Record the scheduler-side outcome of j2's run back into the
    // repository, the way the event-ingestion side of the system would.
    let mut mirror = run_row(run2.id, "j2", run2.node.as_str());
    mirror.cancelled = true;
    c.repo.push_run(mirror);
    c.driver.cycle(false).await.unwrap();

    // Fresh scheduler, same repository, replay from serial 0.
    let replay = cluster();
    let rows = c.repo.fetch_job_updates(0, 0).await.unwrap();
    for row in rows.0 {
        replay.repo.push_job(row);
    }
    for row in rows.1 {
        replay.repo.push_run(row);
    }
    let mut replay_driver = replay.driver;
    replay_driver.cycle(false).await.unwrap();

    let a = c.db.read_txn();
    let b = replay.db.read_txn();
    assert_eq!(a.len(), b.len());
    for job in a.get_all() {
        let other = b.get_by_id(&job.id).unwrap();
        assert_eq!(job.queued, other.queued);
        assert_eq!(job.succeeded, other.succeeded);
        assert_eq!(job.cancelled, other.cancelled);
        assert_eq!(job.failed, other.failed);
        for run in &job.runs {
            let mirrored = other.run(run.id).unwrap();
            assert_eq!(run.succeeded, mirrored.succeeded);
            assert_eq!(run.failed, mirrored.failed);
        }
    }
}

/// Invariants 1 and 2 hold at every commit point of a busy lifecycle.
#[tokio::test]
async fn store_invariants_hold_across_a_lifecycle() {
    let mut c = cluster();
    c.repo.push_job(job_row("j1", 1_000_000));
    c.repo.push_job(job_row("j2", 1_000_000));
    c.api.lease_burst(&lease_request(vec![])).await;

    for step in 0..4 {
        c.driver.cycle(true).await.unwrap();
        if step == 1 {
            let run = job(&c, "j1").latest_run().unwrap().clone();
            let mut bounce = run_row(run.id, "j1", run.node.as_str());
            bounce.failed = true;
            bounce.returned = true;
            bounce.run_attempted = true;
            c.repo.push_run(bounce);
        }
        if step == 2 {
            let mut cancel = job_row("j2", 1_000_000);
            cancel.cancel_requested = true;
            c.repo.push_job(cancel);
        }

        let read = c.db.read_txn();
        for job in read.get_all() {
            if job.queued {
                assert!(
                    !job.has_open_run(),
                    "queued job {} still has an open run",
                    job.id
                );
            }
            if job.in_terminal_state() {
                assert!(
                    job.runs.iter().all(|r| r.in_terminal_state()),
                    "terminal job {} has a live run",
                    job.id
                );
            }
        }
    }
}
