// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduling-algorithm seam.
//!
//! The fairness/bin-packing scheduler is pluggable: it consumes the staged
//! write transaction plus the executor inventory and decides what to lease,
//! preempt, and fail. The cycle driver applies those decisions and owns all
//! state mutation and event emission. [`FirstFit`] is the bundled placeholder
//! used until a real fairness pass is wired in.

use crate::executors::ExecutorRecord;
use fm_core::{JobId, ResourceList, RunId};
use fm_jobdb::{JobDb, WriteTxn};
use smol_str::SmolStr;
use std::collections::HashMap;

/// A placement decision for one queued job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLease {
    pub job_id: JobId,
    pub executor: SmolStr,
    /// Node name as the executor reports it (not the composite node id).
    pub node: SmolStr,
    pub scheduled_at_priority: i32,
}

/// What one scheduling pass decided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulingOutcome {
    pub to_lease: Vec<NewLease>,
    pub to_preempt: Vec<RunId>,
    pub to_fail: Vec<JobId>,
}

pub trait SchedulingAlgorithm: Send + Sync {
    fn schedule(
        &self,
        db: &JobDb,
        txn: &WriteTxn<'_>,
        executors: &[ExecutorRecord],
    ) -> SchedulingOutcome;
}

/// Greedy first-fit: walk queues alphabetically, jobs in priority order, and
/// place each on the first node with room that satisfies taints and
/// selectors. Never preempts and never declares a job infeasible (that is
/// the submit checker's call on the requeue path).
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstFit;

impl FirstFit {
    pub fn new() -> Self {
        Self
    }
}

impl SchedulingAlgorithm for FirstFit {
    fn schedule(
        &self,
        db: &JobDb,
        txn: &WriteTxn<'_>,
        executors: &[ExecutorRecord],
    ) -> SchedulingOutcome {
        // Node capacity still free, keyed by (executor, node name), starting
        // from allocatable minus what the leased runs already placed there use.
        let mut free: HashMap<(SmolStr, SmolStr), ResourceList> = HashMap::new();
        for executor in executors {
            for node in &executor.nodes {
                let mut capacity = node.allocatable.clone();
                for run_id in &node.run_ids {
                    if let Some(job) = txn.job_for_run(*run_id) {
                        if !job.in_terminal_state() {
                            capacity.sub(&job.scheduling_info.resources);
                        }
                    }
                }
                free.insert((executor.executor_id.clone(), node.name.clone()), capacity);
            }
        }

        let mut outcome = SchedulingOutcome::default();
        for queue in txn.queue_names() {
            for job in txn.queued_in(&queue) {
                let info = &job.scheduling_info;
                let scheduled_at_priority = db
                    .priority_class(&info.priority_class)
                    .map(|class| class.priority)
                    .unwrap_or(0);

                let placement = executors.iter().find_map(|executor| {
                    executor.nodes.iter().find_map(|node| {
                        let key = (executor.executor_id.clone(), node.name.clone());
                        let capacity = free.get(&key)?;
                        let fits = info.resources.fits_within(capacity)
                            && info.tolerates_taints(&node.taints)
                            && info.matches_node_labels(&node.labels);
                        fits.then_some(key)
                    })
                });

                if let Some(key) = placement {
                    if let Some(capacity) = free.get_mut(&key) {
                        capacity.sub(&info.resources);
                    }
                    outcome.to_lease.push(NewLease {
                        job_id: job.id,
                        executor: key.0,
                        node: key.1,
                        scheduled_at_priority,
                    });
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
#[path = "algo_tests.rs"]
mod tests;
