// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Merges repository delta rows into the staged JobDb transaction.
//!
//! Pure over (write transaction, delta batch): no I/O, no clock. Rows are
//! full snapshots of persisted state, so only the newest row per job/run in
//! a batch matters; flags merge under the monotone rules, which also makes
//! replaying a batch idempotent. A row the store rejects (or that fails to
//! unmarshal) is logged and skipped so one corrupt row cannot halt progress.

use fm_adapters::{JobRow, RunRow};
use fm_core::{Job, JobId, JobRun, SchedulingInfo};
use fm_jobdb::{JobDb, NewJob, WriteTxn};
use std::collections::BTreeMap;
use tracing::warn;

/// Cumulative record of which transitions fired for one job since the last
/// reconcile. Booleans OR together across the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStateTransitions {
    pub job_id: JobId,
    pub queued: bool,
    pub scheduled: bool,
    pub pending: bool,
    pub running: bool,
    pub returned: bool,
    pub cancel_requested: bool,
    pub cancelled: bool,
    pub preempted: bool,
    pub failed: bool,
    pub succeeded: bool,
    pub reprioritised: bool,
}

impl JobStateTransitions {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            queued: false,
            scheduled: false,
            pending: false,
            running: false,
            returned: false,
            cancel_requested: false,
            cancelled: false,
            preempted: false,
            failed: false,
            succeeded: false,
            reprioritised: false,
        }
    }

    pub fn any(&self) -> bool {
        self.queued
            || self.scheduled
            || self.pending
            || self.running
            || self.returned
            || self.cancel_requested
            || self.cancelled
            || self.preempted
            || self.failed
            || self.succeeded
            || self.reprioritised
    }
}

/// Apply a delta batch to the transaction, returning the per-job transitions.
pub fn reconcile(
    db: &JobDb,
    txn: &mut WriteTxn<'_>,
    job_rows: &[JobRow],
    run_rows: &[RunRow],
) -> Vec<JobStateTransitions> {
    // Newest row per id wins; rows arrive ascending by serial.
    let mut latest_jobs: BTreeMap<JobId, &JobRow> = BTreeMap::new();
    for row in job_rows {
        latest_jobs.insert(row.job_id, row);
    }
    let mut runs_by_job: BTreeMap<JobId, BTreeMap<fm_core::RunId, &RunRow>> = BTreeMap::new();
    for row in run_rows {
        runs_by_job.entry(row.job_id).or_default().insert(row.run_id, row);
    }

    let mut job_ids: Vec<JobId> = latest_jobs.keys().copied().collect();
    for job_id in runs_by_job.keys() {
        if !latest_jobs.contains_key(job_id) {
            job_ids.push(*job_id);
        }
    }

    let mut all_transitions = Vec::new();
    for job_id in job_ids {
        let existing = txn.get_by_id(&job_id).cloned();
        let job_row = latest_jobs.get(&job_id).copied();
        let mut transitions = JobStateTransitions::new(job_id);

        let merged = match (existing, job_row) {
            (None, None) => continue,
            (None, Some(row)) => match job_from_row(db, row) {
                Some(job) => {
                    // Relative to "never seen", every set flag is a fresh
                    // transition; replay-from-zero counts on this.
                    transitions.queued = job.queued;
                    transitions.cancel_requested =
                        job.cancel_requested || job.cancel_by_jobset_requested;
                    transitions.cancelled = job.cancelled;
                    transitions.succeeded = job.succeeded;
                    transitions.failed = job.failed;
                    Some(job)
                }
                None => None,
            },
            (Some(job), None) => Some(job),
            (Some(job), Some(row)) => Some(merge_job(job, row, &mut transitions)),
        };

        let Some(mut job) = merged else {
            // Without a job snapshot the run rows have nothing to attach to.
            if let Some(runs) = runs_by_job.get(&job_id) {
                warn!(job_id = %job_id, runs = runs.len(), "dropping runs for unknown job");
            }
            continue;
        };

        if let Some(runs) = runs_by_job.get(&job_id) {
            // Creation order, so a replayed job rebuilds its run list the
            // way it originally grew.
            let mut rows: Vec<&RunRow> = runs.values().copied().collect();
            rows.sort_by_key(|r| (r.created_ms, r.serial));
            for row in rows {
                job = merge_run(job, row, &mut transitions);
            }
        }

        if let Err(e) = txn.upsert(vec![job]) {
            warn!(job_id = %job_id, error = %e, "skipping delta that violates store invariants");
            continue;
        }
        all_transitions.push(transitions);
    }
    all_transitions
}

fn unmarshal_info(row: &JobRow) -> Option<SchedulingInfo> {
    match serde_json::from_value::<SchedulingInfo>(row.scheduling_info.clone()) {
        Ok(mut info) => {
            // The row column is authoritative for the version.
            info.version = row.scheduling_info_version;
            Some(info)
        }
        Err(e) => {
            warn!(job_id = %row.job_id, error = %e, "scheduling info failed to unmarshal");
            None
        }
    }
}

/// Construct a fresh snapshot for a job seen for the first time.
fn job_from_row(db: &JobDb, row: &JobRow) -> Option<Job> {
    let info = unmarshal_info(row)?;
    let new = NewJob {
        id: row.job_id,
        queue: row.queue.as_str().into(),
        jobset: row.jobset.as_str().into(),
        priority: row.priority,
        submitted_ms: row.submitted_ms,
        queue_ttl_secs: row.queue_ttl_secs,
        queued: row.queued,
        queued_version: row.queued_version,
        scheduling_info: info,
    };
    let job = match db.create_job(new) {
        Ok(job) => job,
        Err(e) => {
            warn!(job_id = %row.job_id, error = %e, "dropping job row the factory rejected");
            return None;
        }
    };
    // The first row can already carry requested flags.
    let mut job = job;
    if row.cancel_requested {
        job = job.with_cancel_requested();
    }
    if row.cancel_by_jobset_requested {
        job = job.with_cancel_by_jobset_requested();
    }
    if row.cancelled {
        job = job.with_cancelled();
    }
    if row.succeeded {
        job = job.with_succeeded();
    }
    if row.failed {
        job = job.with_failed();
    }
    Some(job)
}

/// Field-by-field reconciliation of an existing snapshot against a newer row.
fn merge_job(mut job: Job, row: &JobRow, transitions: &mut JobStateTransitions) -> Job {
    if row.cancel_requested && !job.cancel_requested {
        job = job.with_cancel_requested();
        transitions.cancel_requested = true;
    }
    if row.cancel_by_jobset_requested && !job.cancel_by_jobset_requested {
        job = job.with_cancel_by_jobset_requested();
        transitions.cancel_requested = true;
    }
    if row.cancelled && !job.cancelled {
        job = job.with_cancelled();
        transitions.cancelled = true;
    }
    if row.succeeded && !job.succeeded {
        job = job.with_succeeded();
        transitions.succeeded = true;
    }
    if row.failed && !job.failed {
        job = job.with_failed();
        transitions.failed = true;
    }

    let priority_changed = row.priority != job.priority;
    if priority_changed {
        job = job.with_priority(row.priority);
    }

    if row.scheduling_info_version > job.scheduling_info.version {
        if let Some(info) = unmarshal_info(row) {
            job = job.with_scheduling_info(info);
        }
    }

    if row.queued_version > job.queued_version {
        job = job.with_queued_from_repo(row.queued, row.queued_version);
        if row.queued {
            transitions.queued = true;
        }
    }

    // Only queued jobs announce a priority change: it reorders the queued
    // index, while a leased run keeps its scheduled-at priority. Checked
    // after the queued merge so a row that requeues and reprioritises at
    // once still announces.
    if priority_changed && job.queued {
        transitions.reprioritised = true;
    }

    job
}

/// Mirror of the job merge for one run row. A newly observed run is
/// synthesized with its flags taken verbatim from the row.
fn merge_run(job: Job, row: &RunRow, transitions: &mut JobStateTransitions) -> Job {
    let updated = match job.run(row.run_id) {
        None => {
            transitions.scheduled = true;
            let mut run = JobRun::new(
                row.run_id,
                row.job_id,
                row.executor.as_str(),
                row.node.as_str(),
                row.scheduled_at_priority,
                row.created_ms,
            );
            run.pending = row.pending;
            run.running = row.running;
            run.preempted = row.preempted;
            run.succeeded = row.succeeded;
            run.failed = row.failed;
            run.cancelled = row.cancelled;
            run.returned = row.returned;
            run.run_attempted = row.run_attempted;
            mark_run_transitions(&run, transitions);
            run
        }
        Some(existing) => {
            let mut run = existing.clone();
            // Terminal and attempt flags are monotone; progress flags track
            // the row unless the run is already terminal locally.
            run.preempted |= row.preempted;
            run.succeeded |= row.succeeded;
            run.failed |= row.failed;
            run.cancelled |= row.cancelled;
            run.returned |= row.returned;
            run.run_attempted |= row.run_attempted;
            if !run.in_terminal_state() {
                run.pending = row.pending;
                run.running = row.running;
            } else {
                run.pending = false;
                run.running = false;
            }
            mark_run_transitions_delta(existing, &run, transitions);
            run
        }
    };
    job.with_updated_run(updated)
}

fn mark_run_transitions(run: &JobRun, transitions: &mut JobStateTransitions) {
    transitions.pending |= run.pending;
    transitions.running |= run.running;
    transitions.preempted |= run.preempted;
    transitions.succeeded |= run.succeeded;
    transitions.failed |= run.failed;
    transitions.cancelled |= run.cancelled;
    transitions.returned |= run.returned;
}

fn mark_run_transitions_delta(old: &JobRun, new: &JobRun, transitions: &mut JobStateTransitions) {
    transitions.pending |= new.pending && !old.pending;
    transitions.running |= new.running && !old.running;
    transitions.preempted |= new.preempted && !old.preempted;
    transitions.succeeded |= new.succeeded && !old.succeeded;
    transitions.failed |= new.failed && !old.failed;
    transitions.cancelled |= new.cancelled && !old.cancelled;
    transitions.returned |= new.returned && !old.returned;
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
