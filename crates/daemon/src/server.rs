// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor API server.
//!
//! One connection per executor session. Each request is answered with a
//! burst of stream messages terminated by exactly one `EndMarker`. The
//! server only reads committed JobDb snapshots; all state it derives for an
//! executor is recomputed per request, so a dropped connection loses nothing
//! (unacknowledged leases are simply re-sent next time, the run's
//! non-terminal state still being in the store).

use fm_adapters::{EventSink, JobRepository};
use fm_core::{Clock, RunId};
use fm_jobdb::JobDb;
use fm_scheduler::{ExecutorRegistry, LeaderController};
use fm_wire::{
    read_message, write_message, EventList, ExecutorRequest, JobRunLease, LeaseRequest,
    LeaseStreamMessage, ProtocolError, SubmitJob,
};
use smol_str::SmolStr;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Annotation naming the submitting user, forwarded on leases.
const OWNER_ANNOTATION: &str = "foreman.io/owner";

pub struct ExecutorApi<C: Clock> {
    db: Arc<JobDb>,
    repo: Arc<dyn JobRepository>,
    registry: Arc<ExecutorRegistry>,
    leader: Arc<dyn LeaderController>,
    sink: Arc<dyn EventSink>,
    clock: C,
}

impl<C: Clock> ExecutorApi<C> {
    pub fn new(
        db: Arc<JobDb>,
        repo: Arc<dyn JobRepository>,
        registry: Arc<ExecutorRegistry>,
        leader: Arc<dyn LeaderController>,
        sink: Arc<dyn EventSink>,
        clock: C,
    ) -> Self {
        Self { db, repo, registry, leader, sink, clock }
    }

    /// Accept executor connections until shutdown.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "executor connected");
                            let api = self.clone();
                            let child = shutdown.child_token();
                            tokio::spawn(async move {
                                if let Err(e) = api.handle_connection(stream, child).await {
                                    debug!(%peer, error = %e, "executor stream closed");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }
        info!("executor api stopped");
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        shutdown: CancellationToken,
    ) -> Result<(), ProtocolError> {
        let (mut reader, mut writer) = stream.into_split();
        loop {
            let request = tokio::select! {
                _ = shutdown.cancelled() => break,
                request = read_message::<_, ExecutorRequest>(&mut reader) => request?,
            };
            let Some(request) = request else {
                break;
            };
            let burst = match request {
                ExecutorRequest::Lease(lease) => self.lease_burst(&lease).await,
                ExecutorRequest::ReportEvents(events) => self.report_events(events).await?,
            };
            for message in burst {
                write_message(&mut writer, &message).await?;
            }
        }
        Ok(())
    }

    /// Server-side reconciliation for one `LeaseRequest`: record the
    /// heartbeat, then derive cancels, preempts, and leases from the latest
    /// committed snapshot.
    pub async fn lease_burst(&self, request: &LeaseRequest) -> Vec<LeaseStreamMessage> {
        self.registry.heartbeat(request, self.clock.epoch_ms());

        // Not the leader: keep the stream alive but hand out no work.
        if self.leader.current_token().is_none() {
            return vec![LeaseStreamMessage::EndMarker];
        }

        let read = self.db.read_txn();
        let mut reported: HashSet<RunId> = request.unassigned_job_run_ids.iter().copied().collect();
        let mut running: Vec<RunId> = Vec::new();
        for node in &request.nodes {
            reported.extend(node.run_ids.iter().copied());
            running.extend(node.run_ids.iter().copied());
        }

        let mut cancels = Vec::new();
        let mut preempts = Vec::new();
        for run_id in running {
            let Some(job) = read.job_for_run(run_id) else {
                continue;
            };
            let Some(run) = job.run(run_id) else {
                continue;
            };
            if run.preempted {
                preempts.push(run_id);
            } else if job.cancelled || job.cancel_wanted() || run.cancelled {
                cancels.push(run_id);
            }
        }

        // Stale unassigned reports are filtered against the repository before
        // being re-leased.
        let inactive: HashSet<RunId> = match self
            .repo
            .find_inactive_runs(&request.unassigned_job_run_ids)
            .await
        {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "inactive-run filter unavailable, re-leasing unfiltered");
                HashSet::new()
            }
        };

        let mut leases = Vec::new();
        let mut seen = HashSet::new();
        for run_id in &request.unassigned_job_run_ids {
            if inactive.contains(run_id) || !seen.insert(*run_id) {
                continue;
            }
            if let Some(lease) = self.lease_for(&read, *run_id, &request.executor_id) {
                leases.push(lease);
            }
        }
        // Newly committed assignments the executor has not heard about yet.
        for job in read.get_all() {
            for run in &job.runs {
                if run.executor == request.executor_id
                    && !run.in_terminal_state()
                    && !reported.contains(&run.id)
                    && seen.insert(run.id)
                {
                    if let Some(lease) = self.lease_for(&read, run.id, &request.executor_id) {
                        leases.push(lease);
                    }
                }
            }
        }
        leases.truncate(request.max_jobs_to_lease as usize);

        let mut burst = Vec::new();
        if !cancels.is_empty() {
            burst.push(LeaseStreamMessage::CancelRuns { job_run_ids: cancels });
        }
        if !preempts.is_empty() {
            burst.push(LeaseStreamMessage::PreemptRuns { job_run_ids: preempts });
        }
        burst.extend(leases.into_iter().map(LeaseStreamMessage::Lease));
        burst.push(LeaseStreamMessage::EndMarker);
        burst
    }

    fn lease_for(
        &self,
        read: &fm_jobdb::ReadTxn,
        run_id: RunId,
        executor_id: &str,
    ) -> Option<JobRunLease> {
        let job = read.job_for_run(run_id)?;
        let run = job.run(run_id)?;
        if run.in_terminal_state()
            || run.executor != executor_id
            || job.queued
            || job.in_terminal_state()
            || job.cancel_wanted()
        {
            return None;
        }
        let user = job
            .scheduling_info
            .annotations
            .get(OWNER_ANNOTATION)
            .cloned()
            .unwrap_or_else(SmolStr::default);
        Some(JobRunLease {
            job_run_id: run_id,
            queue: job.queue.clone(),
            jobset: job.jobset.clone(),
            user,
            groups: Vec::new(),
            submit_job: SubmitJob {
                job_id: job.id,
                priority: job.priority,
                scheduling_info: (*job.scheduling_info).clone(),
            },
        })
    }

    /// Forward executor-originated sequences to the bus. At-least-once: a
    /// failed publish tears the stream down so the executor resends.
    async fn report_events(
        &self,
        events: EventList,
    ) -> Result<Vec<LeaseStreamMessage>, ProtocolError> {
        if let Err(e) = self.sink.publish(&events.sequences).await {
            warn!(error = %e, "failed to forward executor events");
            return Err(ProtocolError::Io(std::io::Error::other(e.to_string())));
        }
        Ok(vec![LeaseStreamMessage::EndMarker])
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
