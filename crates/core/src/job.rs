// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job snapshots and their state machine.
//!
//! A job is in exactly one of {queued, leased, terminal}: terminal when any
//! of the succeeded/failed/cancelled flags is set, leased when neither queued
//! nor terminal. Snapshots are immutable; every mutation derives a new value
//! with the rest structurally shared (`SmolStr`, `Arc`, `imbl::Vector`), so
//! cloning a job into a write transaction is cheap.

use crate::id::{JobId, RunId};
use crate::run::JobRun;
use crate::scheduling::SchedulingInfo;
use imbl::Vector;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: SmolStr,
    pub jobset: SmolStr,
    /// Requested priority; mutable via the repository feed.
    pub priority: u32,
    pub submitted_ms: u64,
    /// Maximum time the job may sit queued before it is cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_ttl_secs: Option<u64>,
    pub scheduling_info: Arc<SchedulingInfo>,
    pub queued: bool,
    /// Bumped by exactly one on every queued↔leased transition.
    pub queued_version: u32,
    #[serde(default)]
    pub cancel_requested: bool,
    #[serde(default)]
    pub cancel_by_jobset_requested: bool,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub succeeded: bool,
    #[serde(default)]
    pub failed: bool,
    /// Runs in creation order; at most one is non-terminal.
    #[serde(default)]
    pub runs: Vector<JobRun>,
}

impl Job {
    pub fn in_terminal_state(&self) -> bool {
        self.succeeded || self.failed || self.cancelled
    }

    pub fn is_leased(&self) -> bool {
        !self.queued && !self.in_terminal_state()
    }

    pub fn cancel_wanted(&self) -> bool {
        self.cancel_requested || self.cancel_by_jobset_requested
    }

    pub fn latest_run(&self) -> Option<&JobRun> {
        self.runs.last()
    }

    pub fn run(&self, run_id: RunId) -> Option<&JobRun> {
        self.runs.iter().find(|r| r.id == run_id)
    }

    pub fn has_open_run(&self) -> bool {
        self.runs.iter().any(|r| !r.in_terminal_state())
    }

    /// Number of runs the executor actually started.
    pub fn run_attempt_count(&self) -> u32 {
        self.runs.iter().filter(|r| r.run_attempted).count() as u32
    }

    /// Derive a snapshot on the other side of a queued↔leased transition.
    pub fn with_queued_bumped(&self, queued: bool) -> Job {
        let mut job = self.clone();
        job.queued = queued;
        job.queued_version += 1;
        job
    }

    /// Overwrite the queued flag from a repository row that carries a newer
    /// queued-version than ours.
    pub fn with_queued_from_repo(&self, queued: bool, queued_version: u32) -> Job {
        let mut job = self.clone();
        job.queued = queued;
        job.queued_version = queued_version;
        job
    }

    pub fn with_priority(&self, priority: u32) -> Job {
        let mut job = self.clone();
        job.priority = priority;
        job
    }

    pub fn with_scheduling_info(&self, info: SchedulingInfo) -> Job {
        let mut job = self.clone();
        job.scheduling_info = Arc::new(info);
        job
    }

    pub fn with_cancel_requested(&self) -> Job {
        let mut job = self.clone();
        job.cancel_requested = true;
        job
    }

    pub fn with_cancel_by_jobset_requested(&self) -> Job {
        let mut job = self.clone();
        job.cancel_by_jobset_requested = true;
        job
    }

    /// Terminal derivations finish any still-open run with the matching
    /// outcome, keeping "terminal job ⇒ all runs terminal" true by
    /// construction.
    pub fn with_cancelled(&self) -> Job {
        let mut job = self.close_open_runs(RunClose::Cancelled);
        job.queued = false;
        job.cancelled = true;
        job
    }

    pub fn with_failed(&self) -> Job {
        let mut job = self.close_open_runs(RunClose::Failed);
        job.queued = false;
        job.failed = true;
        job
    }

    pub fn with_succeeded(&self) -> Job {
        let mut job = self.close_open_runs(RunClose::Succeeded);
        job.queued = false;
        job.succeeded = true;
        job
    }

    pub fn with_new_run(&self, run: JobRun) -> Job {
        let mut job = self.clone();
        job.runs.push_back(run);
        job
    }

    /// Replace the run with the same id; unknown ids are appended.
    pub fn with_updated_run(&self, run: JobRun) -> Job {
        let mut job = self.clone();
        match job.runs.iter().position(|r| r.id == run.id) {
            Some(idx) => {
                job.runs.set(idx, run);
            }
            None => job.runs.push_back(run),
        }
        job
    }

    fn close_open_runs(&self, close: RunClose) -> Job {
        let mut job = self.clone();
        for idx in 0..job.runs.len() {
            if !job.runs[idx].in_terminal_state() {
                let closed = match close {
                    RunClose::Cancelled => job.runs[idx].with_cancelled(),
                    RunClose::Failed => job.runs[idx].with_failed(),
                    RunClose::Succeeded => job.runs[idx].with_succeeded(),
                };
                job.runs.set(idx, closed);
            }
        }
        job
    }
}

#[derive(Clone, Copy)]
enum RunClose {
    Cancelled,
    Failed,
    Succeeded,
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            id: JobId = "job-1",
            queue: SmolStr = "test-queue",
            jobset: SmolStr = "test-jobset",
        }
        set {
            priority: u32 = 10,
            submitted_ms: u64 = 0,
            scheduling_info: Arc<SchedulingInfo> = Arc::new(SchedulingInfo::default()),
            queued: bool = true,
            queued_version: u32 = 1,
            cancel_requested: bool = false,
            cancel_by_jobset_requested: bool = false,
            cancelled: bool = false,
            succeeded: bool = false,
            failed: bool = false,
            runs: Vector<JobRun> = Vector::new(),
        }
        option {
            queue_ttl_secs: u64 = None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
