// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fm_core::ResourceList;

fn request(executor: &str, node_runs: Vec<RunId>, unassigned: Vec<RunId>) -> LeaseRequest {
    LeaseRequest {
        executor_id: executor.into(),
        pool: "default".into(),
        resources: ResourceList::new(),
        minimum_job_size: ResourceList::new(),
        nodes: vec![NodeInfo {
            name: "n1".into(),
            allocatable: ResourceList::new(),
            run_ids: node_runs,
            taints: vec![],
            labels: Default::default(),
        }],
        unassigned_job_run_ids: unassigned,
        max_jobs_to_lease: 8,
    }
}

#[test]
fn heartbeat_registers_and_refreshes() {
    let registry = ExecutorRegistry::new(4);
    registry.heartbeat(&request("e1", vec![], vec![]), 100);
    assert_eq!(registry.get("e1").unwrap().last_seen_ms, 100);

    registry.heartbeat(&request("e1", vec![], vec![]), 250);
    assert_eq!(registry.get("e1").unwrap().last_seen_ms, 250);
    assert_eq!(registry.executors().len(), 1);
}

#[test]
fn reported_runs_union_nodes_and_unassigned() {
    let registry = ExecutorRegistry::new(4);
    let placed = RunId::new();
    let held = RunId::new();
    registry.heartbeat(&request("e1", vec![placed], vec![held]), 100);

    let record = registry.get("e1").unwrap();
    assert!(record.reported_runs.contains(&placed));
    assert!(record.reported_runs.contains(&held));
    assert_eq!(record.reported_runs.len(), 2);
}

#[test]
fn expired_respects_timeout_boundary() {
    let registry = ExecutorRegistry::new(4);
    registry.heartbeat(&request("fresh", vec![], vec![]), 1_000);
    registry.heartbeat(&request("stale", vec![], vec![]), 0);

    // stale is 1500ms old, fresh is 500ms old.
    let expired = registry.expired(1_500, 1_000);
    assert_eq!(expired, vec![SmolStr::new("stale")]);

    // Exactly at the timeout is not yet expired.
    assert!(registry.expired(1_000, 1_000).is_empty());
}

#[test]
fn scheduling_contexts_are_bounded() {
    let registry = ExecutorRegistry::new(2);
    registry.heartbeat(&request("e1", vec![], vec![]), 0);
    for n in 0..5 {
        registry.record_context("e1", SchedulingContext { at_ms: n, leased: 1, ..Default::default() });
    }

    let contexts = registry.contexts("e1");
    assert_eq!(contexts.len(), 2);
    assert_eq!(contexts[0].at_ms, 3);
    assert_eq!(contexts[1].at_ms, 4);
}

#[test]
fn context_for_unknown_executor_is_dropped() {
    let registry = ExecutorRegistry::new(2);
    registry.record_context("ghost", SchedulingContext::default());
    assert!(registry.contexts("ghost").is_empty());
}
