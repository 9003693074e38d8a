// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::executors::ExecutorRecord;
use fm_core::{Job, JobRun, ResourceAmount, SchedulingInfo};
use fm_jobdb::{PriorityClass, PriorityClasses};
use fm_wire::NodeInfo;
use std::collections::HashSet;
use std::sync::Arc;

fn db() -> JobDb {
    let mut classes = PriorityClasses::new();
    classes.insert("batch".into(), PriorityClass { priority: 40, preemptible: true });
    JobDb::new(classes)
}

fn resources(cpu: &str) -> ResourceList {
    [("cpu".into(), cpu.parse::<ResourceAmount>().unwrap())].into_iter().collect()
}

fn node(name: &str, cpu: &str) -> NodeInfo {
    NodeInfo {
        name: name.into(),
        allocatable: resources(cpu),
        run_ids: vec![],
        taints: vec![],
        labels: Default::default(),
    }
}

fn executor(id: &str, nodes: Vec<NodeInfo>) -> ExecutorRecord {
    ExecutorRecord {
        executor_id: id.into(),
        pool: "default".into(),
        last_seen_ms: 0,
        nodes,
        reported_runs: HashSet::new(),
    }
}

fn queued_job(id: &str, priority: u32, cpu: &str) -> Job {
    Job::builder()
        .id(id)
        .queue("q")
        .priority(priority)
        .scheduling_info(Arc::new(SchedulingInfo {
            priority_class: "batch".into(),
            resources: resources(cpu),
            ..Default::default()
        }))
        .build()
}

#[test]
fn places_higher_priority_jobs_first() {
    let db = db();
    let mut txn = db.write_txn();
    txn.upsert(vec![queued_job("low", 1, "2"), queued_job("high", 9, "2")]).unwrap();

    // Only room for one job.
    let executors = vec![executor("e1", vec![node("n1", "2")])];
    let outcome = FirstFit::new().schedule(&db, &txn, &executors);

    assert_eq!(outcome.to_lease.len(), 1);
    assert_eq!(outcome.to_lease[0].job_id, "high");
    assert_eq!(outcome.to_lease[0].scheduled_at_priority, 40);
    assert!(outcome.to_preempt.is_empty());
    assert!(outcome.to_fail.is_empty());
}

#[test]
fn spreads_across_nodes_as_capacity_fills() {
    let db = db();
    let mut txn = db.write_txn();
    txn.upsert(vec![
        queued_job("a", 5, "3"),
        queued_job("b", 5, "3"),
        queued_job("c", 5, "3"),
    ])
    .unwrap();

    let executors = vec![executor("e1", vec![node("n1", "4"), node("n2", "4")])];
    let outcome = FirstFit::new().schedule(&db, &txn, &executors);

    // One 3-cpu job per 4-cpu node; the third stays queued.
    assert_eq!(outcome.to_lease.len(), 2);
    let nodes: Vec<&str> = outcome.to_lease.iter().map(|l| l.node.as_str()).collect();
    assert_eq!(nodes, vec!["n1", "n2"]);
}

#[test]
fn accounts_for_runs_already_on_a_node() {
    let db = db();
    let mut txn = db.write_txn();

    // A leased job occupying 3 of n1's 4 cpus.
    let run = JobRun::builder().job_id("leased").executor("e1").node("e1-n1").build();
    let run_id = run.id;
    let leased = queued_job("leased", 5, "3").with_queued_bumped(false).with_new_run(run);
    txn.upsert(vec![leased, queued_job("next", 5, "2")]).unwrap();

    let mut busy = node("n1", "4");
    busy.run_ids = vec![run_id];
    let executors = vec![executor("e1", vec![busy, node("n2", "4")])];

    let outcome = FirstFit::new().schedule(&db, &txn, &executors);
    assert_eq!(outcome.to_lease.len(), 1);
    assert_eq!(outcome.to_lease[0].job_id, "next");
    assert_eq!(outcome.to_lease[0].node, "n2");
}

#[test]
fn respects_selectors_and_taints() {
    let db = db();
    let mut txn = db.write_txn();
    let mut info = SchedulingInfo {
        priority_class: "batch".into(),
        resources: resources("1"),
        ..Default::default()
    };
    info.node_selector.insert("pool".into(), "gpu".into());
    txn.upsert(vec![Job::builder()
        .id("picky")
        .queue("q")
        .scheduling_info(Arc::new(info))
        .build()])
        .unwrap();

    let mut cpu_node = node("cpu1", "8");
    cpu_node.labels.insert("pool".to_string(), "cpu".to_string());
    let mut gpu_node = node("gpu1", "8");
    gpu_node.labels.insert("pool".to_string(), "gpu".to_string());

    let executors = vec![executor("e1", vec![cpu_node, gpu_node])];
    let outcome = FirstFit::new().schedule(&db, &txn, &executors);

    assert_eq!(outcome.to_lease.len(), 1);
    assert_eq!(outcome.to_lease[0].node, "gpu1");
}

#[test]
fn leases_nothing_without_capacity() {
    let db = db();
    let mut txn = db.write_txn();
    txn.upsert(vec![queued_job("j1", 5, "8")]).unwrap();

    let executors = vec![executor("e1", vec![node("n1", "4")])];
    let outcome = FirstFit::new().schedule(&db, &txn, &executors);
    assert!(outcome.to_lease.is_empty());
}

#[test]
fn unknown_priority_class_schedules_at_zero() {
    let db = db();
    let mut txn = db.write_txn();
    // Empty class name is permitted by the factory and falls back to 0.
    txn.upsert(vec![Job::builder().id("j1").queue("q").build()]).unwrap();

    let executors = vec![executor("e1", vec![node("n1", "8")])];
    let outcome = FirstFit::new().schedule(&db, &txn, &executors);
    assert_eq!(outcome.to_lease[0].scheduled_at_priority, 0);
}
