// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor API message shapes.
//!
//! One stream per executor session. Every executor request is answered by a
//! burst of [`LeaseStreamMessage`]s terminated by exactly one `EndMarker`;
//! a `ReportEvents` request gets an empty burst (its `EndMarker` doubles as
//! the ack).

use fm_core::{EventSequence, JobId, ResourceList, RunId, SchedulingInfo};
use k8s_openapi::api::core::v1::Taint;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Heartbeat + inventory from an executor, asking for work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub executor_id: SmolStr,
    pub pool: SmolStr,
    /// Total resources across the executor's nodes.
    pub resources: ResourceList,
    /// Jobs smaller than this will not fit any node; advisory for scheduling.
    #[serde(default)]
    pub minimum_job_size: ResourceList,
    pub nodes: Vec<NodeInfo>,
    /// Runs the executor holds but has not yet placed on a node.
    #[serde(default)]
    pub unassigned_job_run_ids: Vec<RunId>,
    pub max_jobs_to_lease: u32,
}

/// Per-node inventory inside a [`LeaseRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: SmolStr,
    pub allocatable: ResourceList,
    /// Runs currently executing on this node.
    #[serde(default)]
    pub run_ids: Vec<RunId>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// The job payload an executor needs to start a leased run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitJob {
    pub job_id: JobId,
    pub priority: u32,
    pub scheduling_info: SchedulingInfo,
}

/// A new run for the executor to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRunLease {
    pub job_run_id: RunId,
    pub queue: SmolStr,
    pub jobset: SmolStr,
    #[serde(default)]
    pub user: SmolStr,
    #[serde(default)]
    pub groups: Vec<SmolStr>,
    pub submit_job: SubmitJob,
}

/// One message of a reply burst. Exactly one variant per message; every
/// burst ends with `EndMarker`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LeaseStreamMessage {
    #[serde(rename = "run:lease")]
    Lease(JobRunLease),

    /// Runs the executor currently executes that must stop.
    #[serde(rename = "runs:cancel")]
    CancelRuns { job_run_ids: Vec<RunId> },

    /// Runs to preempt; accounted as preemption, not cancellation.
    #[serde(rename = "runs:preempt")]
    PreemptRuns { job_run_ids: Vec<RunId> },

    #[serde(rename = "end")]
    EndMarker,
}

/// Executor-originated event sequences for the durable bus.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventList {
    pub sequences: Vec<EventSequence>,
}

/// A request from an executor on its stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutorRequest {
    #[serde(rename = "lease")]
    Lease(LeaseRequest),

    #[serde(rename = "report_events")]
    ReportEvents(EventList),
}

#[cfg(test)]
#[path = "messages_tests.rs"]
mod tests;
