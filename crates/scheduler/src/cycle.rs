// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The leader-gated reconcile → schedule → publish → commit cycle.
//!
//! Every tick either commits the transaction after all of its events were
//! published, or rolls the whole thing back and retries next tick. The
//! repository's monotone serials make the retry idempotent: reprocessing the
//! same delta derives the same snapshots under the monotone-flag rules, so
//! observers see either everything from a cycle or nothing.

use crate::algo::SchedulingAlgorithm;
use crate::executors::{ExecutorRegistry, SchedulingContext};
use crate::leader::LeaderController;
use crate::publisher::{PublishError, Publisher, SequenceAccumulator};
use crate::reconciler::{reconcile, JobStateTransitions};
use crate::submit::SubmitChecker;
use fm_adapters::{JobRepository, RepositoryError};
use fm_core::{Clock, ErrorReason, Event, Job, JobId, JobRun, RunId};
use fm_jobdb::{JobDb, WriteTxn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Debug, Clone, Copy)]
pub struct CycleConfig {
    pub cycle_period: Duration,
    /// Run the scheduling pass every Nth cycle.
    pub schedule_every: u32,
    pub executor_timeout: Duration,
    pub max_attempts: u32,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            cycle_period: Duration::from_secs(1),
            schedule_every: 10,
            executor_timeout: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

/// What one cycle did; primarily for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub leader: bool,
    pub reconciled: usize,
    pub leased: usize,
    pub preempted: usize,
    pub cancelled: usize,
    pub requeued: usize,
    pub failed: usize,
    pub succeeded: usize,
    pub sequences: usize,
}

/// A non-returned run failure awaiting its repository error payload.
struct FatalRun {
    job_id: JobId,
    run_id: RunId,
}

pub struct CycleDriver<C: Clock> {
    db: Arc<JobDb>,
    repo: Arc<dyn JobRepository>,
    publisher: Arc<Publisher>,
    leader: Arc<dyn LeaderController>,
    executors: Arc<ExecutorRegistry>,
    algo: Arc<dyn SchedulingAlgorithm>,
    submit: SubmitChecker,
    clock: C,
    config: CycleConfig,
    node_id_label: String,
    last_job_serial: u64,
    last_run_serial: u64,
    ticks: u64,
}

impl<C: Clock> CycleDriver<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<JobDb>,
        repo: Arc<dyn JobRepository>,
        publisher: Arc<Publisher>,
        leader: Arc<dyn LeaderController>,
        executors: Arc<ExecutorRegistry>,
        algo: Arc<dyn SchedulingAlgorithm>,
        clock: C,
        config: CycleConfig,
        node_id_label: impl Into<String>,
    ) -> Self {
        Self {
            db,
            repo,
            publisher,
            leader,
            executors,
            algo,
            submit: SubmitChecker::new(),
            clock,
            config,
            node_id_label: node_id_label.into(),
            last_job_serial: 0,
            last_run_serial: 0,
            ticks: 0,
        }
    }

    pub fn serials(&self) -> (u64, u64) {
        (self.last_job_serial, self.last_run_serial)
    }

    /// Tick until shutdown. Failed cycles roll back and retry next tick.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.cycle_period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "cycle failed, transaction rolled back");
                    }
                }
            }
        }
        info!("cycle driver stopped");
    }

    /// One tick: a reconcile cycle, with the scheduling pass every
    /// `schedule_every`th call.
    pub async fn tick(&mut self) -> Result<CycleSummary, CycleError> {
        self.ticks += 1;
        let schedule =
            self.config.schedule_every > 0 && self.ticks % u64::from(self.config.schedule_every) == 0;
        self.cycle(schedule).await
    }

    /// One full cycle. Public so tests (and the daemon's drain path) can
    /// drive it deterministically.
    pub async fn cycle(&mut self, schedule: bool) -> Result<CycleSummary, CycleError> {
        let mut summary = CycleSummary::default();
        let Some(token) = self.leader.current_token() else {
            debug!("not leader, skipping cycle");
            return Ok(summary);
        };
        summary.leader = true;
        let now = self.clock.epoch_ms();

        // Repository fetches happen before the write transaction opens so the
        // transaction's lifetime stays free of suspension points until publish.
        let (job_rows, run_rows) = self
            .repo
            .fetch_job_updates(self.last_job_serial, self.last_run_serial)
            .await?;
        let job_serial_high = job_rows.last().map(|r| r.serial);
        let run_serial_high = run_rows.last().map(|r| r.serial);

        let mut txn = self.db.write_txn();
        let mut acc = SequenceAccumulator::new();

        let transitions = reconcile(&self.db, &mut txn, &job_rows, &run_rows);
        summary.reconciled = transitions.len();

        let fatal = self.handle_transitions(&mut txn, &transitions, &mut acc, &mut summary, now);
        let run_errors = if fatal.is_empty() {
            Default::default()
        } else {
            let ids: Vec<RunId> = fatal.iter().map(|f| f.run_id).collect();
            self.repo.fetch_job_run_errors(&ids).await?
        };
        self.fail_fatal_runs(&mut txn, &fatal, &run_errors, &mut acc, &mut summary);

        self.expire_executor_leases(&mut txn, &mut acc, &mut summary, now);
        self.expire_queue_ttls(&mut txn, &mut acc, &mut summary, now);

        if schedule {
            self.scheduling_pass(&mut txn, &mut acc, &mut summary, now);
        }

        let sequences = acc.into_sequences();
        summary.sequences = sequences.len();
        // Fence immediately before anything escapes the process.
        self.publisher
            .publish(sequences, || self.leader.is_valid(token))
            .await?;

        txn.commit();
        if let Some(serial) = job_serial_high {
            self.last_job_serial = serial;
        }
        if let Some(serial) = run_serial_high {
            self.last_run_serial = serial;
        }
        Ok(summary)
    }

    /// Derive state changes and events from the reconciler's transition
    /// records: repo-driven cancellation, run success, and lease returns.
    fn handle_transitions(
        &self,
        txn: &mut WriteTxn<'_>,
        transitions: &[JobStateTransitions],
        acc: &mut SequenceAccumulator,
        summary: &mut CycleSummary,
        now: u64,
    ) -> Vec<FatalRun> {
        let mut fatal = Vec::new();
        for t in transitions {
            let Some(job) = txn.get_by_id(&t.job_id).cloned() else {
                continue;
            };

            if t.reprioritised && !job.in_terminal_state() {
                acc.push(
                    &job.queue,
                    &job.jobset,
                    Event::ReprioritisedJob { job_id: job.id, priority: job.priority },
                );
            }

            if t.cancel_requested && !job.in_terminal_state() {
                let cancelled = job.with_cancelled();
                acc.push(&cancelled.queue, &cancelled.jobset, Event::CancelledJob { job_id: job.id });
                summary.cancelled += 1;
                self.upsert_or_warn(txn, cancelled);
                continue;
            }

            if t.succeeded {
                let run_id = job
                    .runs
                    .iter()
                    .rev()
                    .find(|r| r.succeeded)
                    .map(|r| r.id)
                    .unwrap_or_else(RunId::new);
                if !job.in_terminal_state() {
                    self.upsert_or_warn(txn, job.with_succeeded());
                }
                acc.push(&job.queue, &job.jobset, Event::JobSucceeded { job_id: job.id, run_id });
                summary.succeeded += 1;
                continue;
            }

            if t.returned && !job.in_terminal_state() && !job.queued {
                self.handle_lease_return(txn, job, acc, summary, now);
                continue;
            }

            if t.failed && !t.returned && !job.in_terminal_state() {
                if let Some(run) = job.runs.iter().rev().find(|r| r.failed) {
                    fatal.push(FatalRun { job_id: job.id, run_id: run.id });
                }
            }
        }
        fatal
    }

    /// A run failed without returning its lease: the executor hit a fatal
    /// error. Terminate the job with the repository's error payload.
    fn fail_fatal_runs(
        &self,
        txn: &mut WriteTxn<'_>,
        fatal: &[FatalRun],
        run_errors: &std::collections::HashMap<RunId, String>,
        acc: &mut SequenceAccumulator,
        summary: &mut CycleSummary,
    ) {
        for f in fatal {
            let Some(job) = txn.get_by_id(&f.job_id).cloned() else {
                continue;
            };
            if job.in_terminal_state() {
                continue;
            }
            let message = run_errors
                .get(&f.run_id)
                .cloned()
                .unwrap_or_else(|| "run failed".to_string());
            let reason = ErrorReason::ExecutorReported { message };
            acc.push(
                &job.queue,
                &job.jobset,
                Event::JobRunErrors { job_id: job.id, run_id: f.run_id, reason: reason.clone() },
            );
            acc.push(&job.queue, &job.jobset, Event::JobErrors { job_id: job.id, reason });
            summary.failed += 1;
            self.upsert_or_warn(txn, job.with_failed());
        }
    }

    /// Returned lease: requeue with an anti-affinity for the node that ran
    /// it, or terminate if the attempt budget is gone or nothing can host
    /// the job any more.
    fn handle_lease_return(
        &self,
        txn: &mut WriteTxn<'_>,
        job: Job,
        acc: &mut SequenceAccumulator,
        summary: &mut CycleSummary,
        _now: u64,
    ) {
        let attempts = job.run_attempt_count();
        let fail_fast = job.scheduling_info.fail_fast();

        if (fail_fast && attempts >= 1) || attempts >= self.config.max_attempts {
            let reason = ErrorReason::TooManyAttempts { attempts };
            acc.push(&job.queue, &job.jobset, Event::JobErrors { job_id: job.id, reason });
            summary.failed += 1;
            self.upsert_or_warn(txn, job.with_failed());
            return;
        }

        let returned_run = job.runs.iter().rev().find(|r| r.returned).cloned();
        let attempted_node = returned_run.as_ref().filter(|r| r.run_attempted).map(|r| r.node.clone());

        match attempted_node {
            Some(node) => {
                let augmented =
                    job.scheduling_info.with_node_anti_affinity(&self.node_id_label, &node);
                match self.submit.check(&augmented, &self.executors.executors()) {
                    Ok(()) => {
                        let requeued =
                            job.with_scheduling_info(augmented).with_queued_bumped(true);
                        acc.push(
                            &requeued.queue,
                            &requeued.jobset,
                            Event::JobRequeued { job_id: requeued.id },
                        );
                        summary.requeued += 1;
                        self.upsert_or_warn(txn, requeued);
                    }
                    Err(message) => {
                        let reason = ErrorReason::Unschedulable { message };
                        acc.push(&job.queue, &job.jobset, Event::JobErrors {
                            job_id: job.id,
                            reason,
                        });
                        summary.failed += 1;
                        self.upsert_or_warn(txn, job.with_scheduling_info(augmented).with_failed());
                    }
                }
            }
            None => {
                // Never attempted: the executor handed it straight back.
                let requeued = job.with_queued_bumped(true);
                acc.push(
                    &requeued.queue,
                    &requeued.jobset,
                    Event::JobRequeued { job_id: requeued.id },
                );
                summary.requeued += 1;
                self.upsert_or_warn(txn, requeued);
            }
        }
    }

    /// Fail the leased runs of executors that stopped heartbeating.
    fn expire_executor_leases(
        &self,
        txn: &mut WriteTxn<'_>,
        acc: &mut SequenceAccumulator,
        summary: &mut CycleSummary,
        now: u64,
    ) {
        let expired = self
            .executors
            .expired(now, self.config.executor_timeout.as_millis() as u64);
        if expired.is_empty() {
            return;
        }

        let mut victims: Vec<(Job, RunId)> = Vec::new();
        for job in txn.get_all() {
            if job.in_terminal_state() {
                continue;
            }
            if let Some(run) = job
                .runs
                .iter()
                .find(|r| !r.in_terminal_state() && expired.iter().any(|e| *e == r.executor))
            {
                victims.push((job.clone(), run.id));
            }
        }

        for (job, run_id) in victims {
            info!(job_id = %job.id, run_id = %run_id, "lease expired, failing job");
            acc.push(
                &job.queue,
                &job.jobset,
                Event::JobRunErrors {
                    job_id: job.id,
                    run_id,
                    reason: ErrorReason::LeaseExpired,
                },
            );
            acc.push(&job.queue, &job.jobset, Event::JobErrors {
                job_id: job.id,
                reason: ErrorReason::LeaseExpired,
            });
            summary.failed += 1;
            self.upsert_or_warn(txn, job.with_failed());
        }
    }

    /// Cancel queued jobs that out-sat their queue TTL. Both the request and
    /// the terminal event go out in the same cycle.
    fn expire_queue_ttls(
        &self,
        txn: &mut WriteTxn<'_>,
        acc: &mut SequenceAccumulator,
        summary: &mut CycleSummary,
        now: u64,
    ) {
        let expired: Vec<Job> = txn
            .get_all()
            .filter(|job| {
                job.queued
                    && job
                        .queue_ttl_secs
                        .is_some_and(|ttl| now.saturating_sub(job.submitted_ms) > ttl * 1_000)
            })
            .cloned()
            .collect();

        for job in expired {
            acc.push(&job.queue, &job.jobset, Event::CancelJob { job_id: job.id });
            acc.push(&job.queue, &job.jobset, Event::CancelledJob { job_id: job.id });
            summary.cancelled += 1;
            self.upsert_or_warn(txn, job.with_cancel_requested().with_cancelled());
        }
    }

    /// Apply the scheduling algorithm's decisions to the transaction.
    fn scheduling_pass(
        &self,
        txn: &mut WriteTxn<'_>,
        acc: &mut SequenceAccumulator,
        summary: &mut CycleSummary,
        now: u64,
    ) {
        let executors = self.executors.executors();
        let outcome = self.algo.schedule(&self.db, txn, &executors);
        let mut contexts: std::collections::HashMap<smol_str::SmolStr, SchedulingContext> =
            std::collections::HashMap::new();

        for lease in outcome.to_lease {
            let Some(job) = txn.get_by_id(&lease.job_id).cloned() else {
                warn!(job_id = %lease.job_id, "scheduler leased an unknown job, skipping");
                continue;
            };
            if !job.queued || job.in_terminal_state() {
                continue;
            }
            let run_id = RunId::new();
            let node_id = format!("{}-{}", lease.executor, lease.node);
            let run = JobRun::new(
                run_id,
                job.id,
                lease.executor.clone(),
                node_id.as_str(),
                lease.scheduled_at_priority,
                now,
            );
            acc.push(
                &job.queue,
                &job.jobset,
                Event::JobRunLeased {
                    job_id: job.id,
                    run_id,
                    executor: lease.executor.clone(),
                    node: node_id.into(),
                    scheduled_at_priority: lease.scheduled_at_priority,
                },
            );
            summary.leased += 1;
            contexts.entry(lease.executor.clone()).or_insert_with(|| SchedulingContext {
                at_ms: now,
                ..Default::default()
            }).leased += 1;
            self.upsert_or_warn(txn, job.with_queued_bumped(false).with_new_run(run));
        }

        for run_id in outcome.to_preempt {
            let Some(job) = txn.job_for_run(run_id).cloned() else {
                warn!(run_id = %run_id, "scheduler preempted an unknown run, skipping");
                continue;
            };
            let Some(run) = job.run(run_id).cloned() else {
                continue;
            };
            if run.in_terminal_state() || job.in_terminal_state() {
                continue;
            }
            acc.push(&job.queue, &job.jobset, Event::JobRunPreempted { job_id: job.id, run_id });
            acc.push(
                &job.queue,
                &job.jobset,
                Event::JobRunErrors { job_id: job.id, run_id, reason: ErrorReason::Preempted },
            );
            acc.push(&job.queue, &job.jobset, Event::JobErrors {
                job_id: job.id,
                reason: ErrorReason::Preempted,
            });
            summary.preempted += 1;
            contexts.entry(run.executor.clone()).or_insert_with(|| SchedulingContext {
                at_ms: now,
                ..Default::default()
            }).preempted += 1;
            self.upsert_or_warn(txn, job.with_updated_run(run.with_preempted()).with_failed());
        }

        for job_id in outcome.to_fail {
            let Some(job) = txn.get_by_id(&job_id).cloned() else {
                warn!(job_id = %job_id, "scheduler failed an unknown job, skipping");
                continue;
            };
            if job.in_terminal_state() {
                continue;
            }
            acc.push(&job.queue, &job.jobset, Event::JobErrors {
                job_id: job.id,
                reason: ErrorReason::Unschedulable {
                    message: "cannot be scheduled on any executor".to_string(),
                },
            });
            summary.failed += 1;
            self.upsert_or_warn(txn, job.with_failed());
        }

        for (executor, context) in contexts {
            self.executors.record_context(&executor, context);
        }
    }

    fn upsert_or_warn(&self, txn: &mut WriteTxn<'_>, job: Job) {
        let job_id = job.id;
        if let Err(e) = txn.upsert(vec![job]) {
            warn!(job_id = %job_id, error = %e, "dropping update that violates store invariants");
        }
    }
}

#[cfg(test)]
#[path = "cycle_tests.rs"]
mod tests;
