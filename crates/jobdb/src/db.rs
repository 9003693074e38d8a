// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transactional in-memory job store with multi-version concurrency.
//!
//! The current state is a single immutable [`Snapshot`] behind an `Arc`.
//! Read transactions clone the `Arc` and observe that version forever; the
//! one write transaction at a time clones the snapshot's persistent maps
//! (cheap, copy-on-write) and installs its overlay atomically on commit.
//! Readers never block the writer and committed changes are visible only to
//! read transactions opened after the commit.

use crate::intern::Interner;
use crate::priority::{PriorityClass, PriorityClasses};
use fm_core::{Job, JobId, JobRun, RunId, SchedulingInfo};
use imbl::{OrdMap, OrdSet};
use parking_lot::{Mutex, MutexGuard, RwLock};
use smol_str::SmolStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobDbError {
    #[error("job {job_id}: {flag} cannot transition back to false")]
    FlagRegression { job_id: JobId, flag: &'static str },

    #[error("job {job_id}: queued-version regressed from {have} to {got}")]
    QueuedVersionRegression { job_id: JobId, have: u32, got: u32 },

    #[error("job {job_id}: scheduling-info version regressed from {have} to {got}")]
    SchedulingInfoRegression { job_id: JobId, have: u32, got: u32 },

    #[error("run {run_id} already belongs to job {owner}, not {job_id}")]
    RunOwnedElsewhere { run_id: RunId, owner: JobId, job_id: JobId },

    #[error("unknown priority class {0:?}")]
    UnknownPriorityClass(SmolStr),
}

/// Ordering key for the per-queue queued index: highest priority first,
/// oldest submit first, then id for determinism.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedKey {
    priority: u32,
    submitted_ms: u64,
    id: JobId,
}

impl QueuedKey {
    fn of(job: &Job) -> Self {
        Self { priority: job.priority, submitted_ms: job.submitted_ms, id: job.id }
    }
}

impl Ord for QueuedKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.submitted_ms.cmp(&other.submitted_ms))
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for QueuedKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// One immutable version of the store.
#[derive(Clone, Default)]
struct Snapshot {
    jobs: OrdMap<JobId, Job>,
    by_run: OrdMap<RunId, JobId>,
    queued: OrdMap<SmolStr, OrdSet<QueuedKey>>,
}

impl Snapshot {
    fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    fn job_for_run(&self, run_id: RunId) -> Option<&Job> {
        self.by_run.get(&run_id).and_then(|job_id| self.jobs.get(job_id))
    }

    fn queued_in(&self, queue: &str) -> Vec<&Job> {
        let Some(keys) = self.queued.get(queue) else {
            return Vec::new();
        };
        keys.iter().filter_map(|key| self.jobs.get(&key.id)).collect()
    }

    fn queue_names(&self) -> Vec<SmolStr> {
        self.queued.keys().cloned().collect()
    }

    fn apply(&mut self, job: Job) {
        if let Some(old) = self.jobs.get(&job.id) {
            if old.queued {
                if let Some(keys) = self.queued.get_mut(&old.queue) {
                    keys.remove(&QueuedKey::of(old));
                }
            }
        }
        if job.queued {
            if !self.queued.contains_key(&job.queue) {
                self.queued.insert(job.queue.clone(), OrdSet::new());
            }
            if let Some(keys) = self.queued.get_mut(&job.queue) {
                keys.insert(QueuedKey::of(&job));
            }
        }
        for run in &job.runs {
            self.by_run.insert(run.id, job.id);
        }
        self.jobs.insert(job.id, job);
    }

    fn remove(&mut self, id: &JobId) {
        let Some(job) = self.jobs.remove(id) else {
            return;
        };
        if job.queued {
            if let Some(keys) = self.queued.get_mut(&job.queue) {
                keys.remove(&QueuedKey::of(&job));
            }
        }
        for run in &job.runs {
            self.by_run.remove(&run.id);
        }
    }
}

/// Parameters for constructing a job through the store factory.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub queue: SmolStr,
    pub jobset: SmolStr,
    pub priority: u32,
    pub submitted_ms: u64,
    pub queue_ttl_secs: Option<u64>,
    pub queued: bool,
    pub queued_version: u32,
    pub scheduling_info: SchedulingInfo,
}

/// The transactional store. One per process.
pub struct JobDb {
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    priority_classes: PriorityClasses,
    interner: Interner,
}

impl JobDb {
    pub fn new(priority_classes: PriorityClasses) -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::default())),
            writer: Mutex::new(()),
            priority_classes,
            interner: Interner::new(),
        }
    }

    pub fn priority_class(&self, name: &str) -> Option<&PriorityClass> {
        self.priority_classes.get(name)
    }

    /// Construct a job snapshot, resolving the priority class and interning
    /// repeated strings. Jobs enter the store only through this factory so
    /// the class table and intern cache apply consistently.
    pub fn create_job(&self, new: NewJob) -> Result<Job, JobDbError> {
        let mut info = new.scheduling_info;
        if !info.priority_class.is_empty()
            && !self.priority_classes.contains_key(&info.priority_class)
        {
            return Err(JobDbError::UnknownPriorityClass(info.priority_class));
        }
        info.annotations = info
            .annotations
            .into_iter()
            .map(|(k, v)| (self.interner.intern(&k), self.interner.intern(&v)))
            .collect();
        info.node_selector = info
            .node_selector
            .into_iter()
            .map(|(k, v)| (self.interner.intern(&k), self.interner.intern(&v)))
            .collect();

        Ok(Job {
            id: new.id,
            queue: self.interner.intern(&new.queue),
            jobset: self.interner.intern(&new.jobset),
            priority: new.priority,
            submitted_ms: new.submitted_ms,
            queue_ttl_secs: new.queue_ttl_secs,
            scheduling_info: Arc::new(info),
            queued: new.queued,
            queued_version: new.queued_version,
            cancel_requested: false,
            cancel_by_jobset_requested: false,
            cancelled: false,
            succeeded: false,
            failed: false,
            runs: imbl::Vector::new(),
        })
    }

    /// Open a consistent read view of the latest committed state.
    pub fn read_txn(&self) -> ReadTxn {
        ReadTxn { snap: self.current.read().clone() }
    }

    /// Open the (single) write transaction. Blocks if another writer is live.
    pub fn write_txn(&self) -> WriteTxn<'_> {
        let guard = self.writer.lock();
        let snap = self.current.read().as_ref().clone();
        WriteTxn { db: self, _writer: guard, snap }
    }
}

/// A consistent point-in-time view of the store.
pub struct ReadTxn {
    snap: Arc<Snapshot>,
}

impl ReadTxn {
    pub fn get_by_id(&self, id: &JobId) -> Option<&Job> {
        self.snap.get(id)
    }

    pub fn get_all(&self) -> impl Iterator<Item = &Job> {
        self.snap.jobs.values()
    }

    pub fn job_for_run(&self, run_id: RunId) -> Option<&Job> {
        self.snap.job_for_run(run_id)
    }

    /// Queued jobs of a queue, highest priority first.
    pub fn queued_in(&self, queue: &str) -> Vec<&Job> {
        self.snap.queued_in(queue)
    }

    pub fn queue_names(&self) -> Vec<SmolStr> {
        self.snap.queue_names()
    }

    pub fn len(&self) -> usize {
        self.snap.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snap.jobs.is_empty()
    }
}

/// The single writer's overlay. Commit installs it as the new global
/// snapshot; dropping without commit discards every staged change.
pub struct WriteTxn<'db> {
    db: &'db JobDb,
    _writer: MutexGuard<'db, ()>,
    snap: Snapshot,
}

impl WriteTxn<'_> {
    pub fn get_by_id(&self, id: &JobId) -> Option<&Job> {
        self.snap.get(id)
    }

    pub fn get_all(&self) -> impl Iterator<Item = &Job> {
        self.snap.jobs.values()
    }

    pub fn job_for_run(&self, run_id: RunId) -> Option<&Job> {
        self.snap.job_for_run(run_id)
    }

    pub fn queued_in(&self, queue: &str) -> Vec<&Job> {
        self.snap.queued_in(queue)
    }

    pub fn queue_names(&self) -> Vec<SmolStr> {
        self.snap.queue_names()
    }

    /// Stage new snapshots. Either every job passes invariant validation and
    /// all are applied, or none are and the error names the first offender;
    /// the transaction itself stays usable either way.
    pub fn upsert(&mut self, jobs: Vec<Job>) -> Result<(), JobDbError> {
        for job in &jobs {
            self.validate(job)?;
        }
        for job in jobs {
            self.snap.apply(job);
        }
        Ok(())
    }

    pub fn delete(&mut self, ids: &[JobId]) {
        for id in ids {
            self.snap.remove(id);
        }
    }

    /// Atomically publish the overlay as the new global snapshot.
    pub fn commit(self) {
        *self.db.current.write() = Arc::new(self.snap);
    }

    /// Discard every staged change. Equivalent to dropping the transaction.
    pub fn abort(self) {}

    fn validate(&self, job: &Job) -> Result<(), JobDbError> {
        let Some(existing) = self.snap.get(&job.id) else {
            // New job: only check that its runs are not claimed by another job.
            for run in &job.runs {
                if let Some(owner) = self.snap.by_run.get(&run.id) {
                    if *owner != job.id {
                        return Err(JobDbError::RunOwnedElsewhere {
                            run_id: run.id,
                            owner: *owner,
                            job_id: job.id,
                        });
                    }
                }
            }
            return Ok(());
        };

        for (flag, was, is) in [
            ("succeeded", existing.succeeded, job.succeeded),
            ("failed", existing.failed, job.failed),
            ("cancelled", existing.cancelled, job.cancelled),
            ("cancel-requested", existing.cancel_requested, job.cancel_requested),
            (
                "cancel-by-jobset-requested",
                existing.cancel_by_jobset_requested,
                job.cancel_by_jobset_requested,
            ),
        ] {
            if was && !is {
                return Err(JobDbError::FlagRegression { job_id: job.id, flag });
            }
        }

        if job.queued_version < existing.queued_version {
            return Err(JobDbError::QueuedVersionRegression {
                job_id: job.id,
                have: existing.queued_version,
                got: job.queued_version,
            });
        }
        if job.scheduling_info.version < existing.scheduling_info.version {
            return Err(JobDbError::SchedulingInfoRegression {
                job_id: job.id,
                have: existing.scheduling_info.version,
                got: job.scheduling_info.version,
            });
        }

        for old_run in &existing.runs {
            let Some(new_run) = job.run(old_run.id) else {
                continue;
            };
            if let Some(flag) = run_flag_regression(old_run, new_run) {
                return Err(JobDbError::FlagRegression { job_id: job.id, flag });
            }
        }

        Ok(())
    }
}

fn run_flag_regression(old: &JobRun, new: &JobRun) -> Option<&'static str> {
    for (flag, was, is) in [
        ("run succeeded", old.succeeded, new.succeeded),
        ("run failed", old.failed, new.failed),
        ("run cancelled", old.cancelled, new.cancelled),
        ("run preempted", old.preempted, new.preempted),
        ("run returned", old.returned, new.returned),
        ("run-attempted", old.run_attempted, new.run_attempted),
    ] {
        if was && !is {
            return Some(flag);
        }
    }
    None
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
