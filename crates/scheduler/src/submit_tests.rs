// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fm_core::{ResourceAmount, ResourceList};
use fm_wire::NodeInfo;
use k8s_openapi::api::core::v1::Taint;
use std::collections::HashSet;

fn resources(entries: &[(&str, &str)]) -> ResourceList {
    entries.iter().map(|(k, v)| ((*k).into(), v.parse::<ResourceAmount>().unwrap())).collect()
}

fn node(name: &str, allocatable: ResourceList) -> NodeInfo {
    NodeInfo {
        name: name.into(),
        allocatable,
        run_ids: vec![],
        taints: vec![],
        labels: [("node-id".to_string(), format!("e1-{name}"))].into_iter().collect(),
    }
}

fn executor(nodes: Vec<NodeInfo>) -> ExecutorRecord {
    ExecutorRecord {
        executor_id: "e1".into(),
        pool: "default".into(),
        last_seen_ms: 0,
        nodes,
        reported_runs: HashSet::new(),
    }
}

fn requesting(cpu: &str) -> SchedulingInfo {
    SchedulingInfo {
        resources: resources(&[("cpu", cpu)]),
        ..Default::default()
    }
}

#[test]
fn fits_when_some_node_is_large_enough() {
    let checker = SubmitChecker::new();
    let executors = vec![executor(vec![
        node("small", resources(&[("cpu", "1")])),
        node("big", resources(&[("cpu", "16")])),
    ])];
    assert!(checker.check(&requesting("8"), &executors).is_ok());
}

#[test]
fn rejects_when_every_node_is_too_small() {
    let checker = SubmitChecker::new();
    let executors = vec![executor(vec![node("small", resources(&[("cpu", "1")]))])];
    let reason = checker.check(&requesting("8"), &executors).unwrap_err();
    assert!(reason.contains("too small"), "unexpected reason: {reason}");
}

#[test]
fn rejects_when_no_nodes_exist() {
    let checker = SubmitChecker::new();
    assert!(checker.check(&requesting("1"), &[executor(vec![])]).is_err());
    assert!(checker.check(&requesting("1"), &[]).is_err());
}

#[test]
fn untolerated_taints_exclude_a_node() {
    let checker = SubmitChecker::new();
    let mut tainted = node("n1", resources(&[("cpu", "16")]));
    tainted.taints.push(Taint {
        key: "dedicated".to_string(),
        value: Some("infra".to_string()),
        effect: "NoSchedule".to_string(),
        time_added: None,
    });
    let executors = vec![executor(vec![tainted])];

    let reason = checker.check(&requesting("1"), &executors).unwrap_err();
    assert!(reason.contains("tainted"), "unexpected reason: {reason}");
}

#[test]
fn anti_affinity_can_make_a_job_unschedulable() {
    let checker = SubmitChecker::new();
    let executors = vec![executor(vec![node("n1", resources(&[("cpu", "16")]))])];

    let info = requesting("1").with_node_anti_affinity("node-id", "e1-n1");
    let reason = checker.check(&info, &executors).unwrap_err();
    assert!(reason.contains("excluded"), "unexpected reason: {reason}");

    // A second node keeps the job feasible.
    let executors = vec![executor(vec![
        node("n1", resources(&[("cpu", "16")])),
        node("n2", resources(&[("cpu", "16")])),
    ])];
    assert!(checker.check(&info, &executors).is_ok());
}

#[test]
fn ignores_usage_and_checks_allocatable_only() {
    // Feasibility is static: a full node still counts as a fit.
    let checker = SubmitChecker::new();
    let mut busy = node("n1", resources(&[("cpu", "4")]));
    busy.run_ids = vec![fm_core::RunId::new()];
    let executors = vec![executor(vec![busy])];
    assert!(checker.check(&requesting("4"), &executors).is_ok());
}
