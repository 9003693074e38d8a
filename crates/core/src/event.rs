// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle events published to the durable bus.
//!
//! Events travel in ordered sequences grouped by `(queue, jobset)`; the
//! publisher stamps each sequence with a monotone deduplication marker before
//! emission. Serializes with `{"type": "group:name", ...fields}` format.

use crate::id::{JobId, RunId};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Why a job or run terminated unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason")]
pub enum ErrorReason {
    /// The executor stopped heartbeating while holding the lease.
    #[serde(rename = "lease-expired")]
    LeaseExpired,
    /// The job can no longer fit anywhere in the cluster.
    #[serde(rename = "unschedulable")]
    Unschedulable { message: String },
    /// Attempt budget exhausted.
    #[serde(rename = "too-many-attempts")]
    TooManyAttempts { attempts: u32 },
    #[serde(rename = "preempted")]
    Preempted,
    /// Failure reported by the executor with its own message.
    #[serde(rename = "executor-reported")]
    ExecutorReported { message: String },
}

crate::simple_display! {
    ErrorReason {
        LeaseExpired => "lease-expired",
        Unschedulable { .. } => "unschedulable",
        TooManyAttempts { .. } => "too-many-attempts",
        Preempted => "preempted",
        ExecutorReported { .. } => "executor-reported",
    }
}

/// A single lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A new run was leased to an executor.
    #[serde(rename = "job:run_leased")]
    JobRunLeased {
        job_id: JobId,
        run_id: RunId,
        executor: SmolStr,
        node: SmolStr,
        scheduled_at_priority: i32,
    },

    /// The job terminated with an error.
    #[serde(rename = "job:errors")]
    JobErrors { job_id: JobId, reason: ErrorReason },

    /// A run terminated with an error.
    #[serde(rename = "job:run_errors")]
    JobRunErrors {
        job_id: JobId,
        run_id: RunId,
        reason: ErrorReason,
    },

    #[serde(rename = "job:run_preempted")]
    JobRunPreempted { job_id: JobId, run_id: RunId },

    /// Cancellation has been requested (queue TTL or user request).
    #[serde(rename = "job:cancel")]
    CancelJob { job_id: JobId },

    /// The job is now cancelled (terminal).
    #[serde(rename = "job:cancelled")]
    CancelledJob { job_id: JobId },

    #[serde(rename = "job:reprioritised")]
    ReprioritisedJob { job_id: JobId, priority: u32 },

    #[serde(rename = "job:succeeded")]
    JobSucceeded { job_id: JobId, run_id: RunId },

    /// A returned lease put the job back on the queue.
    #[serde(rename = "job:requeued")]
    JobRequeued { job_id: JobId },

    // Executor-reported progress, forwarded verbatim to the bus.
    #[serde(rename = "run:pending")]
    JobRunPending { job_id: JobId, run_id: RunId },

    #[serde(rename = "run:running")]
    JobRunRunning { job_id: JobId, run_id: RunId },

    /// Raw pod-level event observed by the executor (kubelet scheduling
    /// warnings, image pulls, probes). Forwarded as-is; the scheduler never
    /// acts on these.
    #[serde(rename = "run:pod_event")]
    JobRunPodEvent {
        job_id: JobId,
        run_id: RunId,
        /// Kubernetes event type, "Normal" or "Warning".
        kind: SmolStr,
        reason: SmolStr,
        message: String,
    },

    /// Flush sentinel consumers use to detect that all publishers have
    /// drained up to a point.
    #[serde(rename = "marker:partition")]
    PartitionMarker { partition: u32 },
}

impl Event {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Event::JobRunLeased { job_id, .. }
            | Event::JobErrors { job_id, .. }
            | Event::JobRunErrors { job_id, .. }
            | Event::JobRunPreempted { job_id, .. }
            | Event::CancelJob { job_id }
            | Event::CancelledJob { job_id }
            | Event::ReprioritisedJob { job_id, .. }
            | Event::JobSucceeded { job_id, .. }
            | Event::JobRequeued { job_id }
            | Event::JobRunPending { job_id, .. }
            | Event::JobRunRunning { job_id, .. }
            | Event::JobRunPodEvent { job_id, .. } => Some(*job_id),
            Event::PartitionMarker { .. } => None,
        }
    }
}

/// An ordered batch of events for one `(queue, jobset)` delivery scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSequence {
    pub queue: SmolStr,
    pub jobset: SmolStr,
    /// Monotone marker stamped by the publisher; downstream consumers drop
    /// sequences they have already seen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_id: Option<u64>,
    pub events: Vec<Event>,
}

impl EventSequence {
    pub fn new(queue: impl Into<SmolStr>, jobset: impl Into<SmolStr>) -> Self {
        Self {
            queue: queue.into(),
            jobset: jobset.into(),
            dedup_id: None,
            events: Vec::new(),
        }
    }

    /// Sequence carrying a partition marker; not scoped to any jobset.
    pub fn marker(partition: u32) -> Self {
        Self {
            queue: SmolStr::default(),
            jobset: SmolStr::default(),
            dedup_id: None,
            events: vec![Event::PartitionMarker { partition }],
        }
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
