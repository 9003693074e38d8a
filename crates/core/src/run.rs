// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One attempted execution of a job on one executor.

use crate::id::{JobId, RunId};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// An immutable run snapshot. Mutation derives a new value via the `with_*`
/// methods; the flags only ever transition false→true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: RunId,
    pub job_id: JobId,
    pub created_ms: u64,
    pub executor: SmolStr,
    /// Executor id concatenated with the node name.
    pub node: SmolStr,
    pub scheduled_at_priority: i32,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub preempted: bool,
    #[serde(default)]
    pub succeeded: bool,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub cancelled: bool,
    /// Lease handed back by the executor without the run finishing.
    #[serde(default)]
    pub returned: bool,
    /// The executor actually started the run at least once.
    #[serde(default)]
    pub run_attempted: bool,
}

impl JobRun {
    pub fn new(
        id: RunId,
        job_id: JobId,
        executor: impl Into<SmolStr>,
        node: impl Into<SmolStr>,
        scheduled_at_priority: i32,
        created_ms: u64,
    ) -> Self {
        Self {
            id,
            job_id,
            created_ms,
            executor: executor.into(),
            node: node.into(),
            scheduled_at_priority,
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

    pub fn in_terminal_state(&self) -> bool {
        self.succeeded || self.failed || self.cancelled
    }

    pub fn with_running(&self) -> Self {
        let mut run = self.clone();
        run.pending = false;
        run.running = true;
        run.run_attempted = true;
        run
    }

    pub fn with_succeeded(&self) -> Self {
        let mut run = self.clone();
        run.running = false;
        run.succeeded = true;
        run
    }

    pub fn with_failed(&self) -> Self {
        let mut run = self.clone();
        run.running = false;
        run.failed = true;
        run
    }

    pub fn with_cancelled(&self) -> Self {
        let mut run = self.clone();
        run.running = false;
        run.cancelled = true;
        run
    }

    /// Preemption is accounted distinctly from cancellation but still
    /// terminates the run as failed.
    pub fn with_preempted(&self) -> Self {
        let mut run = self.clone();
        run.running = false;
        run.preempted = true;
        run.failed = true;
        run
    }

    pub fn with_returned(&self) -> Self {
        let mut run = self.clone();
        run.returned = true;
        run
    }
}

crate::builder! {
    pub struct RunBuilder => JobRun {
        into {
            job_id: JobId = "job-1",
            executor: SmolStr = "test-executor",
            node: SmolStr = "test-executor-test-node",
        }
        set {
            id: RunId = RunId::new(),
            created_ms: u64 = 0,
            scheduled_at_priority: i32 = 0,
            pending: bool = false,
            running: bool = false,
            preempted: bool = false,
            succeeded: bool = false,
            failed: bool = false,
            cancelled: bool = false,
            returned: bool = false,
            run_attempted: bool = false,
        }
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
